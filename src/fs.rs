// The in-memory filesystem behind the FileSystem capability. Paths are
// canonical, forward-slash absolute strings by the time they get here;
// the capability layer owns sandboxing and canonicalisation.

use std::collections::HashMap;


#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileKind {
    File,
    Dir,
}


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileMode {
    Read,
    Write,
    Append,
}


#[derive(Clone, Debug, PartialEq)]
pub enum FsError {
    NotFound(String),
    NotAFile(String),
    NotADir(String),
    MissingParent(String),
    BadHandle(u64),
}


#[derive(Clone, Debug)]
enum FsNode {
    File(Vec<u8>),
    Dir,
}


#[derive(Clone, Debug)]
struct OpenFile {
    path: String,
    mode: FileMode,
    // Writes accumulate here and reach the tree on flush or close.
    pending: Vec<u8>,
}


#[derive(Clone, Debug)]
struct DirIter {
    entries: Vec<(String, FileKind)>,
    next: usize,
}


pub struct FsState {
    nodes: HashMap<String, FsNode>,
    files: HashMap<u64, OpenFile>,
    iters: HashMap<u64, DirIter>,
    next_handle: u64,
}


fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0)  => String::from("/"),
        Some(i)  => path[..i].to_string(),
        None     => String::from("/"),
    }
}


impl FsState {
    pub fn new() -> FsState {
        let mut nodes = HashMap::new();
        nodes.insert(String::from("/"), FsNode::Dir);
        FsState {
            nodes,
            files: HashMap::new(),
            iters: HashMap::new(),
            next_handle: 1,
        }
    }

    fn fresh_handle(&mut self) -> u64 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    pub fn exists(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn kind(&self, path: &str) -> Option<FileKind> {
        match self.nodes.get(path) {
            Some(FsNode::File(_)) => Some(FileKind::File),
            Some(FsNode::Dir)     => Some(FileKind::Dir),
            None                  => None,
        }
    }

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>, FsError> {
        match self.nodes.get(path) {
            Some(FsNode::File(bytes)) => Ok(bytes.clone()),
            Some(FsNode::Dir)         => Err(FsError::NotAFile(String::from(path))),
            None                      => Err(FsError::NotFound(String::from(path))),
        }
    }

    pub fn write_file(&mut self, path: &str, bytes: Vec<u8>) -> Result<(), FsError> {
        self.require_dir(&parent_of(path))?;
        if let Some(FsNode::Dir) = self.nodes.get(path) {
            return Err(FsError::NotAFile(String::from(path)));
        }
        self.nodes.insert(String::from(path), FsNode::File(bytes));
        Ok(())
    }

    fn require_dir(&self, path: &str) -> Result<(), FsError> {
        match self.nodes.get(path) {
            Some(FsNode::Dir)     => Ok(()),
            Some(FsNode::File(_)) => Err(FsError::NotADir(String::from(path))),
            None                  => Err(FsError::MissingParent(String::from(path))),
        }
    }

    pub fn create_dir(&mut self, path: &str) -> Result<(), FsError> {
        self.require_dir(&parent_of(path))?;
        if let Some(FsNode::File(_)) = self.nodes.get(path) {
            return Err(FsError::NotADir(String::from(path)));
        }
        self.nodes.insert(String::from(path), FsNode::Dir);
        Ok(())
    }

    // Create every missing directory along the path.
    pub fn ensure_dir(&mut self, path: &str) -> Result<(), FsError> {
        if path == "/" {
            return Ok(());
        }
        let segs: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        let mut cur = String::new();
        for seg in segs {
            cur.push('/');
            cur.push_str(seg);
            match self.nodes.get(&cur) {
                Some(FsNode::Dir)     => {}
                Some(FsNode::File(_)) => return Err(FsError::NotADir(cur)),
                None                  => {
                    self.nodes.insert(cur.clone(), FsNode::Dir);
                }
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, path: &str) -> Result<(), FsError> {
        if !self.nodes.contains_key(path) {
            return Err(FsError::NotFound(String::from(path)));
        }
        // Removing a directory takes its subtree with it.
        let prefix = format!("{}/", path);
        self.nodes
            .retain(|key, _| key != path && !key.starts_with(&prefix));
        Ok(())
    }

    // ---- file handles ----

    pub fn open_read(&mut self, path: &str) -> Result<u64, FsError> {
        self.read_file(path)?;
        let handle = self.fresh_handle();
        self.files.insert(
            handle,
            OpenFile {
                path: String::from(path),
                mode: FileMode::Read,
                pending: Vec::new(),
            },
        );
        Ok(handle)
    }

    pub fn open_write(&mut self, path: &str) -> Result<u64, FsError> {
        self.read_file(path)?;
        self.open_for(path, FileMode::Write, Vec::new())
    }

    pub fn create_write(&mut self, path: &str) -> Result<u64, FsError> {
        self.write_file(path, Vec::new())?;
        self.open_for(path, FileMode::Write, Vec::new())
    }

    pub fn open_append(&mut self, path: &str) -> Result<u64, FsError> {
        let existing = self.read_file(path)?;
        self.open_for(path, FileMode::Append, existing)
    }

    fn open_for(&mut self, path: &str, mode: FileMode, pending: Vec<u8>) -> Result<u64, FsError> {
        let handle = self.fresh_handle();
        self.files.insert(
            handle,
            OpenFile {
                path: String::from(path),
                mode,
                pending,
            },
        );
        Ok(handle)
    }

    pub fn handle_mode(&self, handle: u64) -> Result<FileMode, FsError> {
        self.files
            .get(&handle)
            .map(|f| f.mode)
            .ok_or(FsError::BadHandle(handle))
    }

    pub fn handle_read_all(&self, handle: u64) -> Result<Vec<u8>, FsError> {
        let file = self.files.get(&handle).ok_or(FsError::BadHandle(handle))?;
        self.read_file(&file.path)
    }

    pub fn handle_write(&mut self, handle: u64, bytes: &[u8]) -> Result<(), FsError> {
        let file = self.files.get_mut(&handle).ok_or(FsError::BadHandle(handle))?;
        file.pending.extend_from_slice(bytes);
        Ok(())
    }

    pub fn handle_flush(&mut self, handle: u64) -> Result<(), FsError> {
        let file = self
            .files
            .get(&handle)
            .ok_or(FsError::BadHandle(handle))?
            .clone();
        self.write_file(&file.path, file.pending)
    }

    pub fn handle_close(&mut self, handle: u64) -> Result<(), FsError> {
        let file = self.files.remove(&handle).ok_or(FsError::BadHandle(handle))?;
        match file.mode {
            FileMode::Read => Ok(()),
            _              => self.write_file(&file.path, file.pending),
        }
    }

    // ---- directory iteration ----

    pub fn open_dir(&mut self, path: &str) -> Result<u64, FsError> {
        self.require_dir(path).map_err(|_| match self.nodes.get(path) {
            Some(_) => FsError::NotADir(String::from(path)),
            None    => FsError::NotFound(String::from(path)),
        })?;
        let prefix = if path == "/" {
            String::from("/")
        } else {
            format!("{}/", path)
        };
        let mut entries: Vec<(String, FileKind)> = self
            .nodes
            .iter()
            .filter_map(|(key, node)| {
                let rest = key.strip_prefix(&prefix)?;
                if rest.is_empty() || rest.contains('/') {
                    return None;
                }
                let kind = match node {
                    FsNode::File(_) => FileKind::File,
                    FsNode::Dir     => FileKind::Dir,
                };
                Some((String::from(rest), kind))
            })
            .collect();
        entries.sort();
        let handle = self.fresh_handle();
        self.iters.insert(handle, DirIter { entries, next: 0 });
        Ok(handle)
    }

    pub fn dir_next(&mut self, handle: u64) -> Result<Option<(String, FileKind)>, FsError> {
        let iter = self.iters.get_mut(&handle).ok_or(FsError::BadHandle(handle))?;
        if iter.next >= iter.entries.len() {
            return Ok(None);
        }
        let entry = iter.entries[iter.next].clone();
        iter.next += 1;
        Ok(Some(entry))
    }

    pub fn dir_close(&mut self, handle: u64) {
        self.iters.remove(&handle);
    }
}
