//! Page registration
//!
//! Registration aligns a scanned page against the blank template of its form type. The
//! alignment itself is a black box behind [`ImageRegistrar`]; this module validates its
//! parameters and outcome, and drives it over a catalog with [`register_pages`].
//! [`CommandRegistrar`] hands each page to an external alignment program.

use crate::core::catalog::{PageAddress, PageCatalog, PageEntry, PageId};
use crate::core::error::{CatalogError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Fewest correspondences that determine a homography
pub const MIN_USABLE_MATCHES: usize = 4;

/// Tuning for one registration run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationParams {
    /// Upper bound on detected features per image
    pub max_features: usize,
    /// Share of the best matches kept, in `(0, 1]`
    pub keep_fraction: f64,
    /// Matches below this count make the result untrustworthy
    pub min_matches: usize,
    /// Ask the registrar for its diagnostic output
    pub debug: bool,
}

impl Default for RegistrationParams {
    fn default() -> Self {
        RegistrationParams {
            max_features: 500,
            keep_fraction: 0.2,
            min_matches: 10,
            debug: false,
        }
    }
}

impl RegistrationParams {
    pub fn validate(&self) -> Result<()> {
        if self.max_features == 0 {
            return Err(CatalogError::InvalidRegistrationParams(
                "max_features must be greater than zero".to_string(),
            ));
        }
        if !(self.keep_fraction > 0.0 && self.keep_fraction <= 1.0) {
            return Err(CatalogError::InvalidRegistrationParams(format!(
                "keep_fraction must be in (0, 1], got {}",
                self.keep_fraction
            )));
        }
        if self.min_matches < MIN_USABLE_MATCHES {
            return Err(CatalogError::InvalidRegistrationParams(format!(
                "min_matches must be at least {}, got {}",
                MIN_USABLE_MATCHES, self.min_matches
            )));
        }
        Ok(())
    }
}

/// One alignment job handed to a registrar
#[derive(Debug, Clone, Copy)]
pub struct RegistrationRequest<'a> {
    pub source: &'a Path,
    pub template: &'a Path,
    /// Where the aligned image must be written
    pub output: &'a Path,
    pub params: &'a RegistrationParams,
}

/// Successful alignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alignment {
    pub output: PathBuf,
    pub matches_used: usize,
}

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("Only {matches} usable matches, at least {required} required")]
    LowConfidence { matches: usize, required: usize },

    #[error("Registration failed: {0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of one alignment attempt
pub type RegistrationResult<T> = std::result::Result<T, RegistrationError>;

/// Black-box image alignment
pub trait ImageRegistrar {
    /// Align `request.source` to `request.template` and write the result to `request.output`
    fn register(&self, request: &RegistrationRequest<'_>) -> RegistrationResult<Alignment>;
}

/// Registrar that runs an external alignment program
///
/// The program is called as `<program> [args..] --max-features <n> --keep-fraction <f>
/// [--debug] <source> <template> <output>`. It must write the aligned image to
/// `<output>` and print the number of matches it used as the last line of its standard
/// output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRegistrar {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandRegistrar {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        CommandRegistrar {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Add a fixed argument placed before the generated ones
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    fn failed(&self, what: impl std::fmt::Display) -> RegistrationError {
        RegistrationError::Failed(format!("{}: {}", self.program.display(), what))
    }
}

impl ImageRegistrar for CommandRegistrar {
    fn register(&self, request: &RegistrationRequest<'_>) -> RegistrationResult<Alignment> {
        if let Some(parent) = request.output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--max-features")
            .arg(request.params.max_features.to_string())
            .arg("--keep-fraction")
            .arg(request.params.keep_fraction.to_string());
        if request.params.debug {
            command.arg("--debug");
        }
        command
            .arg(request.source)
            .arg(request.template)
            .arg(request.output);
        debug!("Running {:?}", command);

        let output = command.output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.failed(format!("{} ({})", output.status, stderr.trim())));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let last_line = stdout.lines().map(str::trim).rev().find(|l| !l.is_empty());
        let matches_used = last_line
            .and_then(|line| line.parse::<usize>().ok())
            .ok_or_else(|| self.failed(format!("no match count in output {:?}", last_line)))?;
        if !request.output.is_file() {
            return Err(self.failed(format!("wrote no {}", request.output.display())));
        }

        Ok(Alignment {
            output: request.output.to_path_buf(),
            matches_used,
        })
    }
}

/// Blank template image per form type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateSet {
    templates: BTreeMap<String, PathBuf>,
}

impl TemplateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template<S: Into<String>, P: Into<PathBuf>>(
        mut self,
        form_type: S,
        template: P,
    ) -> Self {
        self.insert(form_type, template);
        self
    }

    pub fn insert<S: Into<String>, P: Into<PathBuf>>(&mut self, form_type: S, template: P) {
        self.templates.insert(form_type.into(), template.into());
    }

    pub fn get(&self, form_type: &str) -> Option<&Path> {
        self.templates.get(form_type).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl<S: Into<String>, P: Into<PathBuf>> FromIterator<(S, P)> for TemplateSet {
    fn from_iter<I: IntoIterator<Item = (S, P)>>(iter: I) -> Self {
        let mut set = TemplateSet::new();
        for (form_type, template) in iter {
            set.insert(form_type, template);
        }
        set
    }
}

/// Why a page was not sent to the registrar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Excluded,
    Unclassified,
    AlreadyRegistered,
    NoTemplate,
}

#[derive(Debug)]
pub struct RegistrationFailure {
    pub page_id: PageId,
    pub filename: String,
    pub error: RegistrationError,
}

/// What a [`register_pages`] run did with every entry
#[derive(Debug, Default)]
pub struct RegistrationReport {
    pub registered: Vec<PageId>,
    pub skipped: Vec<(PageId, SkipReason)>,
    pub failed: Vec<RegistrationFailure>,
}

impl RegistrationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Register every pending page of `catalog` and record the aligned outputs
///
/// Excluded, unclassified and already registered entries are skipped, as are entries
/// whose form type has no template. A registrar error or an alignment with fewer than
/// `params.min_matches` correspondences is reported as a failure and leaves the entry
/// unregistered. Catalog errors abort the run.
pub fn register_pages<R: ImageRegistrar + ?Sized>(
    catalog: &mut PageCatalog,
    registrar: &R,
    templates: &TemplateSet,
    output_dir: &Path,
    params: &RegistrationParams,
) -> Result<RegistrationReport> {
    params.validate()?;

    let entries: Vec<PageEntry> = catalog.pages().collect::<Result<_>>()?;
    let mut report = RegistrationReport::default();

    for entry in entries {
        let skip = if entry.excluded {
            Some(SkipReason::Excluded)
        } else if entry.is_registered() {
            Some(SkipReason::AlreadyRegistered)
        } else if !entry.is_classified() {
            Some(SkipReason::Unclassified)
        } else {
            None
        };
        if let Some(reason) = skip {
            report.skipped.push((entry.page_id, reason));
            continue;
        }

        let Some(template) = templates.get(&entry.form_type) else {
            debug!("No template for form type {}", entry.form_type);
            report.skipped.push((entry.page_id, SkipReason::NoTemplate));
            continue;
        };

        let address = entry.address()?;
        let source = match catalog.container() {
            Some(container) => container.resolve_address(&address),
            None => PathBuf::from(address.path()),
        };
        let output = output_dir.join(output_name(entry.page_id, &address));
        let request = RegistrationRequest {
            source: &source,
            template,
            output: &output,
            params,
        };

        let outcome = registrar.register(&request).and_then(|alignment| {
            if alignment.matches_used < params.min_matches {
                Err(RegistrationError::LowConfidence {
                    matches: alignment.matches_used,
                    required: params.min_matches,
                })
            } else {
                Ok(alignment)
            }
        });

        match outcome {
            Ok(alignment) => {
                catalog.add_registered_page(entry.page_id, &alignment.output.to_string_lossy())?;
                report.registered.push(entry.page_id);
            }
            Err(error) => {
                warn!("Registration of {} failed: {}", entry.filename, error);
                report.failed.push(RegistrationFailure {
                    page_id: entry.page_id,
                    filename: entry.filename,
                    error,
                });
            }
        }
    }

    info!(
        "Registration run: {} registered, {} skipped, {} failed",
        report.registered.len(),
        report.skipped.len(),
        report.failed.len()
    );
    Ok(report)
}

/// `<page_id>_<stem>[_p<index>].aligned.<ext>`
fn output_name(page_id: PageId, address: &PageAddress) -> String {
    let path = Path::new(address.path());
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "page".to_string());
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "png".to_string());
    match address.index() {
        Some(index) => format!("{:06}_{}_p{}.aligned.{}", page_id.get(), stem, index, ext),
        None => format!("{:06}_{}.aligned.{}", page_id.get(), stem, ext),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::NewPage;
    use crate::core::store::CatalogStore;
    use std::cell::RefCell;

    /// Reports a fixed match count per source file name
    struct FakeRegistrar {
        matches: BTreeMap<String, usize>,
        calls: RefCell<Vec<PathBuf>>,
    }

    impl FakeRegistrar {
        fn new(matches: &[(&str, usize)]) -> Self {
            FakeRegistrar {
                matches: matches.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl ImageRegistrar for FakeRegistrar {
        fn register(&self, request: &RegistrationRequest<'_>) -> RegistrationResult<Alignment> {
            self.calls.borrow_mut().push(request.source.to_path_buf());
            let name = request
                .source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match self.matches.get(&name) {
                Some(&matches_used) => Ok(Alignment {
                    output: request.output.to_path_buf(),
                    matches_used,
                }),
                None => Err(RegistrationError::Failed(format!("cannot read {}", name))),
            }
        }
    }

    #[test]
    fn test_params_validation() {
        assert!(RegistrationParams::default().validate().is_ok());

        let bad = [
            RegistrationParams {
                max_features: 0,
                ..Default::default()
            },
            RegistrationParams {
                keep_fraction: 0.0,
                ..Default::default()
            },
            RegistrationParams {
                keep_fraction: 1.5,
                ..Default::default()
            },
            RegistrationParams {
                keep_fraction: f64::NAN,
                ..Default::default()
            },
            RegistrationParams {
                min_matches: 3,
                ..Default::default()
            },
        ];
        for params in bad {
            assert!(matches!(
                params.validate(),
                Err(CatalogError::InvalidRegistrationParams(_))
            ));
        }

        let full = RegistrationParams {
            keep_fraction: 1.0,
            min_matches: MIN_USABLE_MATCHES,
            ..Default::default()
        };
        assert!(full.validate().is_ok());
    }

    #[test]
    fn test_register_pages_accounting() -> Result<()> {
        let mut catalog = CatalogStore::default().open_in_memory()?;
        let good = catalog.add_page(NewPage::new("good.png").form_type("PS2"))?;
        let weak = catalog.add_page(NewPage::new("weak.png").form_type("PS2"))?;
        let broken = catalog.add_page(NewPage::new("broken.png").form_type("PS2"))?;
        let unknown = catalog.add_page(NewPage::new("unknown.png"))?;
        let excluded =
            catalog.add_page(NewPage::new("excluded.png").form_type("PS2").excluded(true))?;
        let done = catalog.add_page(
            NewPage::new("done.png")
                .form_type("PS2")
                .registered_filename("prev.png"),
        )?;
        let orphan_form = catalog.add_page(NewPage::new("other.png").form_type("PS9"))?;

        let registrar = FakeRegistrar::new(&[("good.png", 40), ("weak.png", 5)]);
        let templates = TemplateSet::new().with_template("PS2", "templates/ps2.png");
        let report = register_pages(
            &mut catalog,
            &registrar,
            &templates,
            Path::new("aligned"),
            &RegistrationParams::default(),
        )?;

        assert_eq!(report.registered, vec![good]);
        assert_eq!(
            report.skipped,
            vec![
                (unknown, SkipReason::Unclassified),
                (excluded, SkipReason::Excluded),
                (done, SkipReason::AlreadyRegistered),
                (orphan_form, SkipReason::NoTemplate),
            ]
        );
        let failed: Vec<_> = report.failed.iter().map(|f| f.page_id).collect();
        assert_eq!(failed, vec![weak, broken]);
        assert!(matches!(
            report.failed[0].error,
            RegistrationError::LowConfidence { matches: 5, required: 10 }
        ));
        assert!(!report.is_clean());
        assert_eq!(registrar.calls.borrow().len(), 3);

        let expected = format!("aligned/{:06}_good.aligned.png", good.get());
        assert_eq!(
            catalog.get_page(good)?.registered_filename.as_deref(),
            Some(expected.as_str())
        );
        assert!(!catalog.get_page(weak)?.is_registered());
        assert!(!catalog.get_page(broken)?.is_registered());
        Ok(())
    }

    #[test]
    fn test_invalid_params_abort_before_any_work() -> Result<()> {
        let mut catalog = CatalogStore::default().open_in_memory()?;
        catalog.add_page(NewPage::new("good.png").form_type("PS2"))?;
        let registrar = FakeRegistrar::new(&[("good.png", 40)]);

        let params = RegistrationParams {
            max_features: 0,
            ..Default::default()
        };
        let result = register_pages(
            &mut catalog,
            &registrar,
            &TemplateSet::new().with_template("PS2", "t.png"),
            Path::new("out"),
            &params,
        );
        assert!(result.is_err());
        assert!(registrar.calls.borrow().is_empty());
        Ok(())
    }

    #[test]
    fn test_template_set_from_pairs() {
        let templates: TemplateSet =
            vec![("PS2", "t/ps2.png"), ("PS9", "t/ps9.png"), ("PS2", "t/ps2_v2.png")]
                .into_iter()
                .collect();
        assert_eq!(templates.len(), 2);
        assert_eq!(templates.get("PS2"), Some(Path::new("t/ps2_v2.png")));
        assert_eq!(templates.get("PS4"), None);
    }

    #[test]
    fn test_output_name_for_embedded_page() -> Result<()> {
        let address = PageAddress::parse("batch/book.tiff:3")?;
        assert_eq!(output_name(PageId::new(12), &address), "000012_book_p3.aligned.tiff");

        let address = PageAddress::parse("scan_001")?;
        assert_eq!(output_name(PageId::new(1), &address), "000001_scan_001.aligned.png");
        Ok(())
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> CommandRegistrar {
        let path = dir.join("align.sh");
        std::fs::write(&path, body).unwrap();
        CommandRegistrar::new("sh").arg(path.to_string_lossy())
    }

    #[cfg(unix)]
    #[test]
    fn test_command_registrar_reads_match_count() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let source = temp_dir.path().join("scan.png");
        let template = temp_dir.path().join("form.png");
        std::fs::write(&source, b"scan").unwrap();
        std::fs::write(&template, b"form").unwrap();
        let registrar = script(
            temp_dir.path(),
            "echo \"$@\" > \"$(dirname \"$0\")/args\"\n\
             while [ $# -gt 3 ]; do shift; done\n\
             cp \"$1\" \"$3\"\n\
             echo aligned\n\
             echo 42\n",
        );

        let output = temp_dir.path().join("aligned").join("scan.aligned.png");
        let params = RegistrationParams {
            debug: true,
            ..Default::default()
        };
        let alignment = registrar
            .register(&RegistrationRequest {
                source: &source,
                template: &template,
                output: &output,
                params: &params,
            })
            .unwrap();
        assert_eq!(alignment.matches_used, 42);
        assert_eq!(alignment.output, output);
        assert_eq!(std::fs::read(&output).unwrap(), b"scan");

        let args = std::fs::read_to_string(temp_dir.path().join("args")).unwrap();
        assert!(args.starts_with("--max-features 500 --keep-fraction 0.2 --debug "));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_registrar_failures() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let output = temp_dir.path().join("out.png");
        let params = RegistrationParams::default();
        let request = RegistrationRequest {
            source: Path::new("scan.png"),
            template: Path::new("form.png"),
            output: &output,
            params: &params,
        };

        let crashed = script(temp_dir.path(), "echo 'no features' >&2\nexit 3\n");
        match crashed.register(&request) {
            Err(RegistrationError::Failed(message)) => assert!(message.contains("no features")),
            other => panic!("expected Failed, got {:?}", other),
        }

        let uncounted = script(temp_dir.path(), "echo done\n");
        match uncounted.register(&request) {
            Err(RegistrationError::Failed(message)) => assert!(message.contains("no match count")),
            other => panic!("expected Failed, got {:?}", other),
        }

        let no_output = script(temp_dir.path(), "echo 12\n");
        match no_output.register(&request) {
            Err(RegistrationError::Failed(message)) => assert!(message.contains("wrote no")),
            other => panic!("expected Failed, got {:?}", other),
        }
        assert!(!output.exists());
    }
}
