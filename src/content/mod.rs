//! Content graph reader
//!
//! The course graph is produced and validated offline by the content
//! pipeline. The scheduler only ever reads it.

mod graph;
mod model;

pub use graph::ContentGraph;
pub use model::{
    basket_violation, AudioRefs, Lego, LegoComponent, LegoId, LegoKind, LegoPosition, Phrase,
    PhraseRole, Seed,
};

#[cfg(test)]
pub(crate) use graph::fixtures;

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, SchedulerError};

/// Source of published course graphs
pub trait CourseSource {
    fn get_course_graph(&self, course_code: &str) -> Result<ContentGraph>;
}

/// Reads `<root>/<course_code>.json`
pub struct FileCourseSource {
    root: PathBuf,
}

impl FileCourseSource {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn course_path(&self, course_code: &str) -> PathBuf {
        self.root.join(format!("{}.json", course_code))
    }
}

impl CourseSource for FileCourseSource {
    fn get_course_graph(&self, course_code: &str) -> Result<ContentGraph> {
        let path = self.course_path(course_code);
        if !path.exists() {
            return Err(SchedulerError::CourseNotFound(course_code.to_string()));
        }
        debug!("Loading course graph from {:?}", path);

        let graph = ContentGraph::load(&path)?;
        if graph.course_code() != course_code {
            return Err(SchedulerError::InvalidGraph(format!(
                "{:?} declares course {} but was requested as {}",
                path,
                graph.course_code(),
                course_code
            )));
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_course_reported() {
        let temp = TempDir::new().unwrap();
        let source = FileCourseSource::new(temp.path());
        let err = source.get_course_graph("nope").unwrap_err();
        assert!(matches!(err, SchedulerError::CourseNotFound(_)));
    }

    #[test]
    fn test_course_code_mismatch_rejected() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("ita.json"),
            r#"{"course_code": "spa", "seeds": []}"#,
        )
        .unwrap();
        let source = FileCourseSource::new(temp.path());
        assert!(matches!(
            source.get_course_graph("ita"),
            Err(SchedulerError::InvalidGraph(_))
        ));
    }
}
