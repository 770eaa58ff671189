//! Built-in tools. The engine treats every tool uniformly through the
//! registry; only the file tools live here — the wider tool chest (shell,
//! search, diagnostics) plugs in from outside.

mod fs;

pub use fs::{register_file_tools, AppendFileTool, ReadFileTool, WriteFileTool};
