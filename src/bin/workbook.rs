//! Command-line front end for workbook catalogs

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use workbook_toc::{
    CatalogConfig, CommandRegistrar, PageId, PageQuery, PageState, RegistrationParams,
    TemplateSet, Workbook, WorkbookBuilder,
};

#[derive(Parser, Debug)]
#[command(name = "workbook-toc")]
#[command(about = "Maintain the table of contents of a scanned workbook")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Target {
    /// Workbook container: a directory, a multi-page file or an archive
    #[arg(short, long)]
    container: PathBuf,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Catalog pages present in the container but not yet recorded
    Scan {
        #[command(flatten)]
        target: Target,

        /// Number of embedded pages (multi-page files and archives)
        #[arg(long)]
        pages: Option<u32>,

        /// Report differences without changing the catalog
        #[arg(long)]
        dry_run: bool,
    },

    /// Summarize the catalog and its agreement with the container
    Status {
        #[command(flatten)]
        target: Target,

        /// Number of embedded pages (multi-page files and archives)
        #[arg(long)]
        pages: Option<u32>,
    },

    /// List catalog entries
    Show {
        #[command(flatten)]
        target: Target,

        /// First page number to list
        #[arg(long)]
        from: Option<i64>,

        /// Last page number to list
        #[arg(long)]
        to: Option<i64>,

        /// Only this form type
        #[arg(long)]
        form_type: Option<String>,

        /// Print the full table of contents as JSON
        #[arg(long)]
        json: bool,
    },

    /// Set the form type of a page
    Classify {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        page_id: PageId,

        #[arg(long)]
        form_type: String,

        #[arg(long)]
        comments: Option<String>,
    },

    /// Exclude a page from processing, or include it again
    Exclude {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        page_id: PageId,

        /// Clear the flag instead of setting it
        #[arg(long)]
        include: bool,
    },

    /// Compute missing page checksums
    Checksum {
        #[command(flatten)]
        target: Target,
    },

    /// Align classified pages to their form templates with an external program
    Register {
        #[command(flatten)]
        target: Target,

        /// Alignment program, called with its options then `<source> <template> <output>`
        #[arg(long)]
        program: PathBuf,

        /// Template image for a form type
        #[arg(
            long = "template",
            value_name = "FORM=PATH",
            required = true,
            value_parser = parse_template
        )]
        templates: Vec<(String, PathBuf)>,

        /// Directory for aligned images [default: `aligned` next to the pages]
        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(long, default_value_t = RegistrationParams::default().max_features)]
        max_features: usize,

        #[arg(long, default_value_t = RegistrationParams::default().keep_fraction)]
        keep_fraction: f64,

        /// Fewest matches accepted for an alignment
        #[arg(long, default_value_t = RegistrationParams::default().min_matches)]
        min_matches: usize,

        /// Ask the program for diagnostic output
        #[arg(long)]
        debug: bool,
    },
}

fn parse_template(value: &str) -> std::result::Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((form_type, path)) if !form_type.is_empty() && !path.is_empty() => {
            Ok((form_type.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected FORM=PATH, got '{}'", value)),
    }
}

fn open(target: &Target, require_existing: bool) -> Result<Workbook> {
    let config = match &target.config {
        Some(path) => CatalogConfig::from_file(path)
            .with_context(|| format!("reading configuration {}", path.display()))?,
        None => CatalogConfig::default(),
    };

    let mut builder = WorkbookBuilder::new()
        .container(&target.container)
        .config(config);
    if require_existing {
        builder = builder.require_existing();
    }
    builder
        .build()
        .with_context(|| format!("opening catalog of {}", target.container.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Scan {
            target,
            pages,
            dry_run,
        } => {
            let mut workbook = open(&target, false)?;
            let result = workbook.reconcile(pages)?;
            for key in &result.new {
                println!("+ {}", key);
            }
            for key in &result.orphaned {
                println!("! {}", key);
            }
            println!(
                "{} matched, {} new, {} orphaned",
                result.matched.len(),
                result.new.len(),
                result.orphaned.len()
            );

            if !dry_run && !result.new.is_empty() {
                workbook.catalog_new_pages(pages)?;
                let path = workbook.save()?;
                info!("Catalog written to {}", path.display());
            }
        }

        Command::Status { target, pages } => {
            let workbook = open(&target, true)?;
            let catalog = workbook.catalog();
            let metadata = catalog.metadata()?;

            let mut counts = [0usize; 3];
            let mut excluded = 0usize;
            for entry in catalog.pages() {
                let entry = entry?;
                if entry.excluded {
                    excluded += 1;
                }
                counts[match entry.state() {
                    PageState::Catalogued => 0,
                    PageState::Classified => 1,
                    PageState::Registered => 2,
                }] += 1;
            }

            println!(
                "Container:   {} ({:?})",
                workbook.container().path().display(),
                workbook.container().kind()
            );
            if let Some(source) = catalog.source_path() {
                println!("Catalog:     {}", source.display());
            }
            println!("Schema:      v{}", metadata.schema_version);
            match metadata.last_saved {
                Some(stamp) => println!("Last saved:  {}", stamp.to_rfc3339()),
                None => println!("Last saved:  never"),
            }
            println!("Pages:       {}", catalog.len()?);
            println!("  catalogued {}", counts[0]);
            println!("  classified {}", counts[1]);
            println!("  registered {}", counts[2]);
            println!("  excluded   {}", excluded);

            let result = workbook.reconcile(pages)?;
            if result.is_consistent() {
                println!("Container and catalog agree");
            } else {
                println!(
                    "Out of date: {} new, {} orphaned (run `scan`)",
                    result.new.len(),
                    result.orphaned.len()
                );
            }
        }

        Command::Show {
            target,
            from,
            to,
            form_type,
            json,
        } => {
            let workbook = open(&target, true)?;
            if json {
                println!("{}", workbook.snapshot()?.to_json()?);
                return Ok(());
            }

            let mut query = PageQuery::all();
            if from.is_some() || to.is_some() {
                query = query.page_range(from.unwrap_or(i64::MIN)..=to.unwrap_or(i64::MAX));
            }
            if let Some(form_type) = form_type {
                query = query.form_type(form_type);
            }

            for entry in workbook.catalog().get_pages(query) {
                let entry = entry?;
                println!(
                    "{:>6}  {:>5}  {:<24}  {:<10}  {}{}",
                    entry.page_id.get(),
                    entry.page_number,
                    entry.form_type,
                    format!("{:?}", entry.state()),
                    entry.filename,
                    if entry.excluded { "  [excluded]" } else { "" }
                );
            }
        }

        Command::Classify {
            target,
            page_id,
            form_type,
            comments,
        } => {
            let mut workbook = open(&target, true)?;
            workbook
                .catalog_mut()
                .set_classification(page_id, &form_type, comments.as_deref())?;
            workbook.save()?;
            println!("Page {} classified as {}", page_id, form_type);
        }

        Command::Exclude {
            target,
            page_id,
            include,
        } => {
            let mut workbook = open(&target, true)?;
            workbook.catalog_mut().set_excluded(page_id, !include)?;
            workbook.save()?;
            println!(
                "Page {} {}",
                page_id,
                if include { "included" } else { "excluded" }
            );
        }

        Command::Checksum { target } => {
            let mut workbook = open(&target, true)?;
            let updated = workbook.fill_checksums()?;
            if !updated.is_empty() {
                workbook.save()?;
            }
            println!("{} checksums computed", updated.len());
        }

        Command::Register {
            target,
            program,
            templates,
            output_dir,
            max_features,
            keep_fraction,
            min_matches,
            debug,
        } => {
            let mut workbook = open(&target, true)?;
            let templates: TemplateSet = templates.into_iter().collect();
            let output_dir =
                output_dir.unwrap_or_else(|| workbook.container().base_dir().join("aligned"));
            let params = RegistrationParams {
                max_features,
                keep_fraction,
                min_matches,
                debug,
            };

            let report = workbook.register(
                &CommandRegistrar::new(program),
                &templates,
                &output_dir,
                &params,
            )?;
            if !report.registered.is_empty() {
                workbook.save()?;
            }
            for failure in &report.failed {
                println!("! {} ({}): {}", failure.filename, failure.page_id, failure.error);
            }
            println!(
                "{} registered, {} skipped, {} failed",
                report.registered.len(),
                report.skipped.len(),
                report.failed.len()
            );
            if !report.is_clean() {
                bail!("{} pages failed to register", report.failed.len());
            }
        }
    }

    Ok(())
}
