//! OpenDAL Operator factory for descriptor output

use anyhow::Context;
use ipt_core::{IptError, IptResult};
use opendal::Operator;
use std::path::Path;

/// Build a filesystem operator rooted at `dir`, created on first write.
///
/// Relative directories resolve against the current working directory.
pub fn build_descriptor_operator(dir: &Path) -> IptResult<Operator> {
    let root = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        std::env::current_dir()?.join(dir)
    };
    let root = root
        .to_str()
        .ok_or_else(|| IptError::Config(format!("descriptor dir is not UTF-8: {}", dir.display())))?;

    // opendal 0.55: builders use the consuming pattern
    let builder = opendal::services::Fs::default().root(root);
    let op = Operator::new(builder)
        .context("creating OpenDAL fs operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();
    Ok(op)
}

/// In-memory operator for tests and `--dry-run` style callers
pub fn memory_operator() -> IptResult<Operator> {
    let op = Operator::new(opendal::services::Memory::default())
        .context("creating OpenDAL memory operator")?
        .finish();
    Ok(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_operator_writes_under_root() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("static/tilejson");
        let op = build_descriptor_operator(&dir).unwrap();
        op.write("demo.json", b"{}".to_vec()).await.unwrap();
        assert_eq!(std::fs::read(dir.join("demo.json")).unwrap(), b"{}");
    }

    #[tokio::test]
    async fn memory_operator_round_trips() {
        let op = memory_operator().unwrap();
        op.write("a.json", b"[]".to_vec()).await.unwrap();
        assert_eq!(op.read("a.json").await.unwrap().to_vec(), b"[]");
    }
}
