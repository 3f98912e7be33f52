//! `--dump-cfg`/`-c <out>`: the annotated CFG in DOT form, written to
//! `<out>` (spec §6). Grounded on the teacher's `decompress_til.rs`,
//! which is likewise "transform in memory, write the result to one
//! output path."

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use liftgraph::cfg::BlockGraph;
use liftgraph::render::{render_dot, RenderSettings};

pub fn dump_cfg(graph: &BlockGraph, settings: RenderSettings, out: &Path) -> Result<()> {
    let dot = render_dot(graph, settings);
    fs::write(out, dot).with_context(|| format!("failed to write {}", out.display()))
}
