// Evaluator limits, loadable from a RON file by the driver.

use ron::de::from_reader;
use serde::Deserialize;
use std::fs::File;


#[derive(Deserialize, Debug, Clone)]
pub struct EvalConfig {
    // Call depth at which the evaluator gives up instead of blowing the
    // host stack.
    pub max_call_depth: usize,
    // Default heap quota for allocators created without with_quota;
    // None means unbounded.
    pub heap_quota: Option<u64>,
    pub trace_eval: bool,
}


impl Default for EvalConfig {
    fn default() -> EvalConfig {
        EvalConfig {
            max_call_depth: 512,
            heap_quota: None,
            trace_eval: false,
        }
    }
}


pub fn load(path: String) -> Result<EvalConfig, String> {
    let file = File::open(&path).map_err(|e| e.to_string())?;
    from_reader(file).map_err(|e| e.to_string())
}
