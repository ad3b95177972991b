//! Text rendering of a built operator tree.
//!
//! ```text
//! Limit (limit 2 offset 0)
//! └── MergeSorting (v DESC)
//!     └── Union (2 inputs)
//!         ├── PartialSorting (v DESC)
//!         │   └── Limits
//!         │       └── Blocks
//!         └── ...
//! ```
//!
//! Inputs already handed to worker threads (a running union, say) are no
//! longer reachable and are not shown.

use crate::streams::BlockStream;
use std::fmt::Write;

/// Render `stream` and everything beneath it, one operator per line.
#[must_use]
pub fn explain_stream(stream: &dyn BlockStream) -> String {
    let mut out = String::new();
    write_node(&mut out, stream, "", "");
    out
}

/// Number of operators reachable from `stream`, itself included.
#[must_use]
pub fn operator_count(stream: &dyn BlockStream) -> usize {
    1 + stream.inputs().iter().map(|s| operator_count(s.as_ref())).sum::<usize>()
}

fn write_node(out: &mut String, stream: &dyn BlockStream, own_prefix: &str, child_prefix: &str) {
    let details = stream.describe();
    if details.is_empty() {
        let _ = writeln!(out, "{own_prefix}{}", stream.name());
    } else {
        let _ = writeln!(out, "{own_prefix}{} ({details})", stream.name());
    }

    let inputs = stream.inputs();
    for (i, input) in inputs.iter().enumerate() {
        let last = i + 1 == inputs.len();
        let (branch, rest) = if last { ("└── ", "    ") } else { ("├── ", "│   ") };
        write_node(out, input.as_ref(), &format!("{child_prefix}{branch}"), &format!("{child_prefix}{rest}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Field, Header};
    use crate::streams::{BoxedStream, ConcatStream, LimitStream, NullStream};
    use crate::types::DataType;

    fn null() -> BoxedStream {
        Box::new(NullStream::new(Header::new(vec![Field::new("x", DataType::Int64)])))
    }

    #[test]
    fn renders_nested_inputs_with_branches() {
        let concat: BoxedStream = Box::new(ConcatStream::new(vec![null(), null()]));
        let limit = LimitStream::new(concat, 10, 0, false);
        let text = explain_stream(&limit);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Limit"));
        assert_eq!(lines[1], "└── Concat");
        assert_eq!(lines[2], "    ├── Null");
        assert_eq!(lines[3], "    └── Null");
        assert_eq!(operator_count(&limit), 4);
    }
}
