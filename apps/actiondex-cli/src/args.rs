use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};

pub const USAGE: &str = "Usage:
  actiondex build <docs_dir> [--force] [--version-tag TAG]
  actiondex query <docs_dir> <query> [--version-tag TAG]
  actiondex inspect <docs_dir> <query> [--top-k N] [--version-tag TAG]
  actiondex clear-index
  actiondex clear-cache";

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Build { docs: PathBuf, force: bool, version_tag: Option<String> },
    Query { docs: PathBuf, query: String, version_tag: Option<String> },
    Inspect { docs: PathBuf, query: String, top_k: Option<usize>, version_tag: Option<String> },
    ClearIndex,
    ClearCache,
}

pub fn parse(args: &[String]) -> Result<Command> {
    let Some((name, rest)) = args.split_first() else { bail!("missing command") };
    let mut positional: Vec<&str> = Vec::new();
    let mut force = false;
    let mut version_tag = None;
    let mut top_k = None;
    let mut i = 0;
    while i < rest.len() {
        match rest[i].as_str() {
            "--force" | "-f" => force = true,
            "--version-tag" => {
                i += 1;
                version_tag = Some(rest.get(i).ok_or_else(|| anyhow!("--version-tag requires a value"))?.clone());
            }
            "--top-k" | "-k" => {
                i += 1;
                let raw = rest.get(i).ok_or_else(|| anyhow!("--top-k requires a number"))?;
                top_k = Some(raw.parse::<usize>().map_err(|_| anyhow!("--top-k requires a number, got '{raw}'"))?);
            }
            flag if flag.starts_with('-') => bail!("unknown flag '{flag}'"),
            value => positional.push(value),
        }
        i += 1;
    }

    let docs = || positional.first().map(PathBuf::from).ok_or_else(|| anyhow!("missing <docs_dir>"));
    let query = || positional.get(1).map(|q| (*q).to_string()).ok_or_else(|| anyhow!("missing <query>"));
    Ok(match name.as_str() {
        "build" => Command::Build { docs: docs()?, force, version_tag },
        "query" => Command::Query { docs: docs()?, query: query()?, version_tag },
        "inspect" => Command::Inspect { docs: docs()?, query: query()?, top_k, version_tag },
        "clear-index" => Command::ClearIndex,
        "clear-cache" => Command::ClearCache,
        other => bail!("unknown command '{other}'"),
    })
}
