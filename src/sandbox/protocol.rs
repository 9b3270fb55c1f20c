// src/sandbox/protocol.rs - Line protocol between the runner and the bridge

/// Marks a hardware call on the child's stdout.
pub const HW_PREFIX: &str = "@@HW ";

/// One line of child stdout, split into plain output and an optional call.
#[derive(Debug, PartialEq, Eq)]
pub struct ChildLine<'a> {
    /// Text printed before the call marker (a `print(..., end="")` left over).
    pub output: Option<&'a str>,
    pub call: Option<&'a str>,
}

pub fn classify(line: &str) -> ChildLine<'_> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    match line.find(HW_PREFIX) {
        Some(at) => ChildLine {
            output: (at > 0).then(|| &line[..at]),
            call: Some(&line[at + HW_PREFIX.len()..]),
        },
        None => ChildLine { output: Some(line), call: None },
    }
}
