use std::io::{self, Write};

use serde::Serialize;

use crate::archive::ArchiveHandle;
use crate::reference::ReferenceTree;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_archive(handle: &ArchiveHandle) -> io::Result<()> {
        Self::print_json(handle)
    }

    pub fn print_tree(tree: &ReferenceTree) -> io::Result<()> {
        Self::print_json(tree)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_archive(handle: &ArchiveHandle) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(
            stdout,
            "{} ({} objects, {} bytes)",
            handle.path,
            handle.entries.len(),
            handle.size
        )?;
        for entry in &handle.entries {
            writeln!(stdout, "  {entry}")?;
        }
        Ok(())
    }

    pub fn print_tree(tree: &ReferenceTree) -> io::Result<()> {
        write!(io::stdout(), "{tree}")
    }
}
