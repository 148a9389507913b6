/// One source-prefix mapping of a submodule. A `None` target excludes
/// matching paths from submodule routing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SubmoduleMapping {
    pub(crate) source: Vec<u8>,
    pub(crate) target: Option<Vec<u8>>,
    pub(crate) module: usize,
}

/// The parsed submodules table: module paths plus their path mappings.
#[derive(Default)]
pub(crate) struct SubmoduleDefs {
    pub(crate) modules: Vec<String>,
    pub(crate) mappings: Vec<SubmoduleMapping>,
}

/// Parses the INI-like submodules table. A `[module-name]` header starts a
/// submodule; `source-path : target-path` lines map source prefixes into
/// its tree. A `.` target addresses the submodule root; an `<ignore>`
/// target discards matching paths; a module named `<ignore>` is suppressed
/// entirely, swallowing its mappings.
pub(crate) fn load(
    src: &mut dyn std::io::BufRead,
) -> Result<(SubmoduleDefs, usize), std::io::Error> {
    let mut defs = SubmoduleDefs::default();
    let mut errors = 0_usize;
    // None both before the first header and inside an "<ignore>" module
    let mut current_module = None;

    let mut line = Vec::new();
    loop {
        line.clear();
        src.read_until(b'\n', &mut line)?;
        let ended = !line.ends_with(b"\n");

        let trimmed = line.trim_ascii();
        if trimmed.starts_with(b"#") || trimmed.is_empty() {
            if ended {
                break;
            }
            continue;
        }

        if let Some(header) = trimmed.strip_prefix(b"[").and_then(|s| s.strip_suffix(b"]")) {
            if header == b"<ignore>" {
                current_module = None;
            } else {
                current_module = Some(defs.modules.len());
                defs.modules
                    .push(String::from_utf8_lossy(header).into_owned());
            }
        } else if let Some(sep) = trimmed.iter().position(|&c| c == b':') {
            if let Some(module) = current_module {
                let source = strip_dir_slash(trimmed[..sep].trim_ascii());
                let target = strip_dir_slash(trimmed[(sep + 1)..].trim_ascii());

                // a literal "<ignore>" source matches nothing; skip it
                if source != b"<ignore>" && !source.is_empty() {
                    let target = match target {
                        b"<ignore>" => None,
                        b"." => Some(Vec::new()),
                        other => Some(other.to_vec()),
                    };

                    let duplicate = defs
                        .mappings
                        .iter()
                        .any(|mapping| mapping.source == source);
                    if duplicate {
                        tracing::warn!(
                            "submodule source repeated: \"{}\"",
                            source.escape_ascii(),
                        );
                        errors += 1;
                    } else {
                        defs.mappings.push(SubmoduleMapping {
                            source: source.to_vec(),
                            target,
                            module,
                        });
                    }
                }
            }
        } else {
            tracing::warn!("unparsable submodule line: \"{}\"", trimmed.escape_ascii());
            errors += 1;
        }

        if ended {
            break;
        }
    }

    Ok((defs, errors))
}

fn strip_dir_slash(path: &[u8]) -> &[u8] {
    path.strip_suffix(b"/").unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::load;

    #[test]
    fn parses_modules_and_mappings() {
        let table = b"# modules\n\
            [lib]\n\
            trunk/lib/ : .\n\
            trunk/include : include/\n\
            [docs]\n\
            trunk/doc : .\n";
        let (defs, errors) = load(&mut table.as_slice()).unwrap();
        assert_eq!(errors, 0);
        assert_eq!(defs.modules, ["lib", "docs"]);
        assert_eq!(defs.mappings.len(), 3);

        // "." becomes the module root, trailing slashes are dropped
        assert_eq!(defs.mappings[0].source, b"trunk/lib");
        assert_eq!(defs.mappings[0].target.as_deref(), Some(b"".as_slice()));
        assert_eq!(defs.mappings[0].module, 0);
        assert_eq!(defs.mappings[1].target.as_deref(), Some(b"include".as_slice()));
        assert_eq!(defs.mappings[2].module, 1);
    }

    #[test]
    fn ignore_module_and_sources() {
        let table = b"[<ignore>]\n\
            trunk/scrap : .\n\
            [lib]\n\
            <ignore> : whatever\n\
            trunk/lib/vendored : <ignore>\n\
            trunk/lib : .\n";
        let (defs, errors) = load(&mut table.as_slice()).unwrap();
        assert_eq!(errors, 0);
        assert_eq!(defs.modules, ["lib"]);
        // the "<ignore>" module swallowed its mapping; the "<ignore>"
        // source line was dropped; the "<ignore>" target maps to None
        assert_eq!(defs.mappings.len(), 2);
        assert_eq!(defs.mappings[0].source, b"trunk/lib/vendored");
        assert_eq!(defs.mappings[0].target, None);
        assert_eq!(defs.mappings[1].source, b"trunk/lib");
    }

    #[test]
    fn duplicate_sources_are_counted() {
        let table = b"[lib]\ntrunk/lib : .\ntrunk/lib : other\n";
        let (defs, errors) = load(&mut table.as_slice()).unwrap();
        assert_eq!(errors, 1);
        assert_eq!(defs.mappings.len(), 1);
    }
}
