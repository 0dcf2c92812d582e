//! Header resolution and the header cache.

use std::{mem, path::PathBuf};

use tracing::debug;

use crate::{PreprocessError, Preprocessor};

impl Preprocessor {
    /// Resolves and preprocesses `#include` arguments like `<stdio.h>` or `"util.h"`.
    ///
    /// The cache is keyed by the spelled path, not a canonical one, so two spellings of the same
    /// file are processed twice. A cached header never touches the filesystem again.
    pub fn include(&mut self, header_name: &str) -> Result<String, PreprocessError> {
        let header_name = header_name.trim();
        let quoted = match (header_name.chars().next(), header_name.chars().last()) {
            (Some('"'), Some('"')) if header_name.len() >= 2 => true,
            (Some('<'), Some('>')) if header_name.len() >= 2 => false,
            _ => {
                return Err(PreprocessError::MalformedInclude {
                    argument: header_name.to_owned(),
                })
            }
        };
        let header_path = &header_name[1..header_name.len() - 1];

        if let Some(cached) = self.headers.get(header_path) {
            debug!(header_path, "include served from the header cache");
            return Ok(cached.clone());
        }

        let resolved = self.resolve(header_path, quoted).ok_or_else(|| {
            PreprocessError::HeaderNotFound {
                name: header_path.to_owned(),
            }
        })?;
        debug!(path = %resolved.display(), "including header");

        if self.include_stack.contains(&resolved) {
            return Err(PreprocessError::IncludeCycle { path: resolved });
        }
        self.include_stack.push(resolved.clone());

        // The recursion repoints `current_file`; restore it on both the success and the error
        // path so the outer file keeps resolving its own relative includes.
        let saved = mem::replace(&mut self.current_file, resolved.clone());
        let result = self.process(&resolved);
        self.current_file = saved;
        self.include_stack.pop();
        let mut content = result?;

        // A trailing newline keeps the included text from gluing onto the next line of the
        // including file.
        content.push('\n');
        self.headers.insert(header_path.to_owned(), content.clone());
        Ok(content)
    }

    /// A `"..."` include first tries the directory of the including file; both forms then fall
    /// back to the configured search path list, first hit winning.
    fn resolve(&self, header_path: &str, quoted: bool) -> Option<PathBuf> {
        if quoted {
            if let Some(parent) = self.current_file.parent() {
                let candidate = parent.join(header_path);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        self.options
            .stdlib_path
            .iter()
            .map(|directory| directory.join(header_path))
            .find(|candidate| candidate.is_file())
    }
}
