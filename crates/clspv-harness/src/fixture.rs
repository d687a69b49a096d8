/* BEGIN LICENSE
  clspv-harness, a Vulkan test harness for clspv-compiled OpenCL kernels.
  Copyright (C) 2025 SupaMaggie70 (Magnus Larsson)


  clspv-harness is free software; you can redistribute it and/or
  modify it under the terms of the GNU General Public License
  as published by the Free Software Foundation; either version 3
  of the License, or (at your option) any later version.

  clspv-harness is distributed in the hope that it will be useful,
  but WITHOUT ANY WARRANTY; without even the implied warranty of
  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
  GNU General Public License for more details.

  You should have received a copy of the GNU General Public License
  along with this program.  If not, see <http://www.gnu.org/licenses/>.
END LICENSE */
//! Narrow collaborator interfaces for test fixtures: loading named resources and
//! running a list of named cases without letting one failure stop the rest.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
};

use crate::{HarnessError, HarnessResult};

/// Source of module binaries and spvmaps, by file name.
pub trait ResourceLoader {
    fn load(&self, name: &str) -> HarnessResult<Vec<u8>>;
}

/// Loads resources from files under a root directory.
#[derive(Clone, Debug)]
pub struct DirectoryLoader {
    root: PathBuf,
}

impl DirectoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResourceLoader for DirectoryLoader {
    fn load(&self, name: &str) -> HarnessResult<Vec<u8>> {
        let path = self.root.join(name);
        log::trace!("Loading resource {}", path.display());
        Ok(std::fs::read(path)?)
    }
}

/// In-memory resources, mostly for tests.
impl ResourceLoader for HashMap<String, Vec<u8>> {
    fn load(&self, name: &str) -> HarnessResult<Vec<u8>> {
        self.get(name).cloned().ok_or_else(|| {
            HarnessError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no resource named `{name}`"),
            ))
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestOutcome {
    Pass,
    Fail(String),
    Skip(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TestSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl TestSummary {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

type TestCase<'a, C> = Box<dyn Fn(&C) -> HarnessResult<TestOutcome> + 'a>;

/// Runs registered cases against a shared context `C` (usually a [`crate::Device`]).
/// An error returned by a case is recorded as a failure of that case only.
pub struct TestRunner<'a, C: ?Sized> {
    cases: Vec<(String, TestCase<'a, C>)>,
}

impl<C: ?Sized> Default for TestRunner<'_, C> {
    fn default() -> Self {
        Self { cases: Vec::new() }
    }
}

impl<'a, C: ?Sized> TestRunner<'a, C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        case: impl Fn(&C) -> HarnessResult<TestOutcome> + 'a,
    ) -> &mut Self {
        self.cases.push((name.into(), Box::new(case)));
        self
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn run(&self, context: &C) -> TestSummary {
        let mut summary = TestSummary::default();
        for (name, case) in &self.cases {
            match case(context) {
                Ok(TestOutcome::Pass) => {
                    log::info!("[PASS] {name}");
                    summary.passed += 1;
                }
                Ok(TestOutcome::Skip(reason)) => {
                    log::warn!("[SKIP] {name}: {reason}");
                    summary.skipped += 1;
                }
                Ok(TestOutcome::Fail(reason)) => {
                    log::error!("[FAIL] {name}: {reason}");
                    summary.failed += 1;
                }
                Err(e) => {
                    log::error!("[FAIL] {name}: {e}");
                    summary.failed += 1;
                }
            }
        }
        log::info!(
            "{} passed, {} failed, {} skipped",
            summary.passed,
            summary.failed,
            summary.skipped
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_count_as_failures_without_stopping_the_run() {
        let mut runner = TestRunner::<u32>::new();
        runner
            .register("passes", |_| Ok(TestOutcome::Pass))
            .register("errors", |_| Err(HarnessError::NoSupportedDevice))
            .register("skips", |_| Ok(TestOutcome::Skip("no images".into())))
            .register("checks context", |n| {
                Ok(if *n == 7 {
                    TestOutcome::Pass
                } else {
                    TestOutcome::Fail(format!("got {n}"))
                })
            });
        let summary = runner.run(&7);
        assert_eq!(
            summary,
            TestSummary {
                passed: 2,
                failed: 1,
                skipped: 1
            }
        );
        assert_eq!(summary.total(), 4);
        assert!(!summary.all_passed());
    }

    #[test]
    fn map_loader() {
        let mut files = HashMap::new();
        files.insert("a.spvmap".to_owned(), b"kernel_decl,a".to_vec());
        assert_eq!(files.load("a.spvmap").unwrap(), b"kernel_decl,a");
        let err = files.load("b.spv").unwrap_err();
        assert!(matches!(err, HarnessError::Io(e) if e.kind() == io::ErrorKind::NotFound));
    }

    #[test]
    fn directory_loader_reports_missing_files() {
        let loader = DirectoryLoader::new("/nonexistent/clspv-harness");
        assert!(matches!(loader.load("x.spv"), Err(HarnessError::Io(_))));
    }
}
