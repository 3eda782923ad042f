// Source spans attached to every AST node by the parser.

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Span {
    pub file: String,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}


impl Span {
    pub fn new(file: &str, sl: u32, sc: u32, el: u32, ec: u32) -> Span {
        Span {
            file: String::from(file),
            start_line: sl,
            start_col: sc,
            end_line: el,
            end_col: ec,
        }
    }

    pub fn is_dummy(&self) -> bool {
        self.file.is_empty()
    }

    // The smallest span covering both. Spans from different files keep
    // the left operand.
    pub fn merge(&self, other: &Span) -> Span {
        if self.is_dummy() {
            return other.clone();
        }
        if other.is_dummy() || self.file != other.file {
            return self.clone();
        }
        let (start_line, start_col) =
            if (self.start_line, self.start_col) <= (other.start_line, other.start_col) {
                (self.start_line, self.start_col)
            } else {
                (other.start_line, other.start_col)
            };
        let (end_line, end_col) =
            if (self.end_line, self.end_col) >= (other.end_line, other.end_col) {
                (self.end_line, self.end_col)
            } else {
                (other.end_line, other.end_col)
            };
        Span {
            file: self.file.clone(),
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }
}
