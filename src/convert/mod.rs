use std::path::Path;

use crate::authors::Authors;
use crate::branches::BranchDef;
use crate::git::{Branch, Repository};
use crate::submodule::SubmoduleDefs;
use crate::svn;
use crate::term_out::ProgressPrint;

mod replayer;
mod router;
mod window;

pub(crate) use replayer::{verify_text, Converter, Submodule};
pub(crate) use router::Router;

/// Fatal conversion failure. Details are logged at the failure site.
#[derive(Debug)]
pub(crate) struct ConvertError;

pub(crate) struct Options {
    pub(crate) skip_prescan: bool,
    pub(crate) start: Option<u32>,
    pub(crate) cutoff: Option<u32>,
    pub(crate) collect: Option<u32>,
}

/// The two-pass driver: a validating prescan over the dump, then the
/// conversion replay, then the finishing flush.
pub(crate) fn run(
    progress_print: &ProgressPrint,
    options: &Options,
    authors: &Authors,
    branch_defs: &[BranchDef],
    module_defs: &SubmoduleDefs,
    src_path: &Path,
    dst_path: &Path,
) -> Result<(), ConvertError> {
    let repository = Repository::open(dst_path, String::new()).map_err(|e| {
        tracing::error!("failed to open destination repository: {e}");
        ConvertError
    })?;

    let mut converter = Converter::new(repository, authors, options.collect);

    for def in branch_defs {
        converter.repository.add_branch(Branch::new(
            def.name.clone(),
            Some(def.prefix.clone()),
            def.is_tag,
        ));
    }

    let (submodules, router) = init_submodules(module_defs, branch_defs, dst_path)?;
    converter.set_submodules(submodules, router);

    if !options.skip_prescan {
        prescan_pass(progress_print, options, &mut converter, src_path)?;
    }

    convert_pass(progress_print, options, &mut converter, src_path)?;

    converter.finish()?;
    progress_print.finish_progress();
    Ok(())
}

/// Every submodule is a full repository of its own, mirroring the primary
/// branch layout; the router rewrites matching source paths into it.
fn init_submodules(
    module_defs: &SubmoduleDefs,
    branch_defs: &[BranchDef],
    dst_path: &Path,
) -> Result<(Vec<Submodule>, Router), ConvertError> {
    let mut submodules = Vec::with_capacity(module_defs.modules.len());
    for module_path in &module_defs.modules {
        let module_dir = dst_path.join(module_path);
        std::fs::create_dir_all(&module_dir).map_err(|e| {
            tracing::error!("failed to create submodule directory {module_dir:?}: {e}");
            ConvertError
        })?;
        let mut repository =
            Repository::open(&module_dir, module_path.clone()).map_err(|e| {
                tracing::error!("failed to open submodule repository {module_dir:?}: {e}");
                ConvertError
            })?;
        for def in branch_defs {
            repository.add_branch(Branch::new(
                def.name.clone(),
                Some(def.prefix.clone()),
                def.is_tag,
            ));
        }
        submodules.push(Submodule {
            path: module_path.clone(),
            repository,
        });
    }

    let mut router = Router::new();
    for mapping in &module_defs.mappings {
        let inserted = router.add_source(
            mapping.source.clone(),
            mapping.module,
            mapping.target.clone(),
        );
        debug_assert!(inserted, "duplicate mappings are rejected by the loader");
    }

    Ok((submodules, router))
}

fn prescan_pass(
    progress_print: &ProgressPrint,
    options: &Options,
    converter: &mut Converter<'_>,
    src_path: &Path,
) -> Result<(), ConvertError> {
    tracing::info!("prescanning dump");

    let mut source = open_source(src_path)?;
    let mut stream = open_stream(source.stream(), false)?;

    let mut errors = 0_usize;
    while let Some(node) = next_node(&mut stream)? {
        if options.cutoff.is_some_and(|cutoff| node.rev >= cutoff) {
            break;
        }
        progress_print.set_progress(progress_line(
            "Scanning",
            node.rev,
            final_rev(&stream, options),
        ));
        if options.start.map_or(true, |start| node.rev >= start) {
            errors += converter.prescan(&node);
        }
    }
    close_source(source)?;

    converter.window_mut().sort_reservations();
    for &(using_rev, copied_from_rev) in converter.window_mut().reservations() {
        tracing::debug!("{using_rev} <- {copied_from_rev}");
    }

    if errors > 0 {
        tracing::error!("{errors} problems found, correct the errors listed above and run again");
        return Err(ConvertError);
    }
    tracing::info!("note: --skip can be used to skip this pre-scan");
    Ok(())
}

fn convert_pass(
    progress_print: &ProgressPrint,
    options: &Options,
    converter: &mut Converter<'_>,
    src_path: &Path,
) -> Result<(), ConvertError> {
    tracing::info!("converting dump");

    let mut source = open_source(src_path)?;
    let mut stream = open_stream(source.stream(), false)?;

    while let Some(node) = next_node(&mut stream)? {
        if options.cutoff.is_some_and(|cutoff| node.rev >= cutoff) {
            break;
        }
        if converter.last_rev() != Some(node.rev) {
            progress_print.set_progress(progress_line(
                "Converting",
                node.rev,
                final_rev(&stream, options),
            ));
        }
        if options.start.map_or(true, |start| node.rev >= start) {
            converter.apply(&node)?;
        }
    }
    close_source(source)
}

fn open_source(src_path: &Path) -> Result<svn::source::DumpSource, ConvertError> {
    svn::source::DumpSource::open(src_path).map_err(|e| {
        tracing::error!("failed to open SVN dump source: {e}");
        ConvertError
    })
}

fn close_source(source: svn::source::DumpSource) -> Result<(), ConvertError> {
    source.close().map_err(|e| {
        tracing::error!("SVN dump source error: {e}");
        ConvertError
    })
}

fn open_stream<'a>(
    stream: &'a mut dyn std::io::BufRead,
    ignore_text: bool,
) -> Result<svn::dump::NodeStream<'a>, ConvertError> {
    svn::dump::NodeStream::new(stream, ignore_text).map_err(|e| {
        tracing::error!("failed to read SVN dump: {e}");
        ConvertError
    })
}

fn next_node(
    stream: &mut svn::dump::NodeStream<'_>,
) -> Result<Option<svn::dump::RevNode>, ConvertError> {
    stream.next_node().map_err(|e| {
        tracing::error!("failed to read SVN dump record: {e}");
        ConvertError
    })
}

fn final_rev(stream: &svn::dump::NodeStream<'_>, options: &Options) -> Option<u32> {
    let final_rev = stream.final_rev()?;
    Some(match options.cutoff {
        Some(cutoff) if cutoff < final_rev => cutoff,
        _ => final_rev,
    })
}

pub(crate) fn progress_line(verb: &str, rev: u32, final_rev: Option<u32>) -> String {
    match final_rev {
        Some(final_rev) if final_rev != 0 => {
            let percent = u64::from(rev) * 100 / u64::from(final_rev);
            format!("{verb}: {percent}% ({rev}/{final_rev})")
        }
        _ => format!("{verb}: {rev}"),
    }
}
