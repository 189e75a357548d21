use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use orgtree::{
    Document, FormatOptions, Keywords, NodeRef, ParseOptions, TAG_COLUMN, parse_with,
    reformat_source,
};

#[derive(Debug, Parser)]
#[command(
    name = "orgtree",
    about = "Parse and reformat org-style headline outlines",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse Org files and print their headline tree.
    Parse(ParseArgs),

    /// Rewrite headlines in canonical form.
    Format(FormatArgs),
}

#[derive(Debug, Args)]
struct KeywordArgs {
    /// Status keywords to recognise (comma-separated, repeatable). Defaults to TODO,DONE.
    #[arg(long = "keyword", value_delimiter = ',')]
    keywords: Vec<String>,
}

impl KeywordArgs {
    fn parse_options(&self) -> Result<ParseOptions> {
        if self.keywords.is_empty() {
            return Ok(ParseOptions::default());
        }
        let keywords = Keywords::new(self.keywords.iter().cloned())
            .context("invalid --keyword value")?;
        Ok(ParseOptions { keywords })
    }
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Org files or directories containing Org files to parse.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Emit JSON instead of an indented outline.
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    keywords: KeywordArgs,
}

#[derive(Debug, Args)]
struct FormatArgs {
    /// Org files or directories to format.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Overwrite the file instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
    /// Column at which tag groups end.
    #[arg(long, default_value_t = TAG_COLUMN)]
    tag_column: usize,
    #[command(flatten)]
    keywords: KeywordArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    match cli.command {
        Commands::Parse(args) => handle_parse(args, verbose),
        Commands::Format(args) => handle_format(args, verbose),
    }
}

fn load_document(path: &Path, options: &ParseOptions) -> Result<Document> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    Ok(parse_with(&text, options.clone()))
}

fn handle_parse(args: ParseArgs, verbose: bool) -> Result<()> {
    let ParseArgs {
        inputs,
        json,
        keywords,
    } = args;
    let options = keywords.parse_options()?;
    let expanded = expand_inputs(&inputs, verbose)?;
    if expanded.is_empty() {
        anyhow::bail!("no Org files found in the provided inputs");
    }

    let mut parsed = Vec::new();
    for path in expanded {
        if verbose {
            eprintln!("Parsing {:?}", path);
        }
        let doc = load_document(&path, &options)?;
        if verbose {
            eprintln!("Found {} headlines in {:?}", doc.len(), path);
        }
        parsed.push((path, doc));
    }

    if json {
        #[derive(serde::Serialize)]
        struct JsonOutput {
            path: String,
            headlines: Vec<orgtree::core::HeadlineSnapshot>,
        }

        let payload: Vec<JsonOutput> = parsed
            .iter()
            .map(|(path, doc)| JsonOutput {
                path: path.display().to_string(),
                headlines: doc.snapshot(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for (idx, (path, doc)) in parsed.iter().enumerate() {
            if let Some(header) = file_header(idx, parsed.len(), path) {
                print!("{header}");
            }
            print!("{}", render_outline(doc));
        }
    }
    Ok(())
}

/// `== path ==` separator printed before each file when more than one file
/// was resolved; later files get a blank line before it.
fn file_header(idx: usize, count: usize, path: &Path) -> Option<String> {
    if count < 2 {
        return None;
    }
    let gap = if idx > 0 { "\n" } else { "" };
    Some(format!("{gap}== {} ==\n", path.display()))
}

/// Indented, human-readable view of the tree (two spaces per depth).
fn render_outline(doc: &Document) -> String {
    let mut out = String::new();
    for node in doc {
        out.push_str(&"  ".repeat(node.ancestors().count()));
        out.push_str(&describe(node));
        out.push('\n');
    }
    out
}

fn describe(node: NodeRef<'_>) -> String {
    let mut parts = vec![format!("[{}]", node.level())];
    if let Some(keyword) = node.keyword() {
        parts.push(keyword.to_string());
    }
    if let Some(priority) = node.priority() {
        parts.push(format!("#{}", priority));
    }
    parts.push(format!("{:?}", node.title()));
    if !node.tags().is_empty() {
        parts.push(format!("tags={}", node.tags().join(",")));
    }
    parts.join(" ")
}

fn handle_format(args: FormatArgs, verbose: bool) -> Result<()> {
    let FormatArgs {
        inputs,
        in_place,
        tag_column,
        keywords,
    } = args;
    let options = keywords.parse_options()?;
    let format_options = FormatOptions { tag_column };
    let expanded = expand_inputs(&inputs, verbose)?;
    if expanded.is_empty() {
        anyhow::bail!("no Org files found in the provided inputs");
    }

    for (idx, path) in expanded.iter().enumerate() {
        if verbose {
            eprintln!("Formatting {:?}", path);
        }
        let formatted = format_file(path, &options, &format_options)?;

        if in_place {
            fs::write(path, formatted.as_bytes())
                .with_context(|| format!("writing {:?}", path))?;
            if verbose {
                eprintln!("Wrote {:?}", path);
            }
        } else {
            if let Some(header) = file_header(idx, expanded.len(), path) {
                print!("{header}");
            }
            print!("{formatted}");
            if !formatted.is_empty() && !formatted.ends_with('\n') {
                println!();
            }
        }
    }

    Ok(())
}

/// File text with every headline in canonical form; all other lines are kept as-is.
fn format_file(path: &Path, options: &ParseOptions, format: &FormatOptions) -> Result<String> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    Ok(reformat_source(&text, options, format))
}

/// Resolve files and directories to a sorted, deduplicated list of `.org` files.
fn expand_inputs(paths: &[PathBuf], verbose: bool) -> Result<Vec<PathBuf>> {
    let mut found = BTreeSet::new();
    for path in paths {
        let canonical =
            fs::canonicalize(path).with_context(|| format!("resolving path {:?}", path))?;
        if canonical.is_file() && !is_org_file(&canonical) {
            anyhow::bail!("{:?} is not an .org file", canonical);
        }
        if verbose {
            eprintln!("Scanning {:?}", canonical);
        }
        collect_org_files(&canonical, &mut found, verbose)?;
    }
    Ok(found.into_iter().collect())
}

fn is_org_file(path: &Path) -> bool {
    path.extension().map(|ext| ext == "org").unwrap_or(false)
}

/// Walk `path` (already canonical) without following symlinks.
fn collect_org_files(path: &Path, found: &mut BTreeSet<PathBuf>, verbose: bool) -> Result<()> {
    let metadata =
        fs::metadata(path).with_context(|| format!("reading metadata for {:?}", path))?;
    if metadata.is_dir() {
        let entries = fs::read_dir(path).with_context(|| format!("listing {:?}", path))?;
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_symlink() {
                continue;
            }
            collect_org_files(&entry.path(), found, verbose)?;
        }
    } else if metadata.is_file() && is_org_file(path) && found.insert(path.to_path_buf()) {
        if verbose {
            eprintln!("Found org file {:?}", path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn expand_inputs_scans_directories_for_org_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        let nested = root.join("nested");
        fs::create_dir_all(&nested).expect("mkdir nested");
        fs::write(root.join("b.org"), "* B").expect("write b");
        fs::write(nested.join("a.org"), "* A").expect("write a");
        fs::write(root.join("notes.txt"), "* ignored").expect("write txt");

        let found = expand_inputs(&[root.to_path_buf()], false).expect("expand");
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().and_then(|n| n.to_str()).unwrap_or_default())
            .collect();
        assert_eq!(found.len(), 2);
        assert!(names.contains(&"a.org"));
        assert!(names.contains(&"b.org"));
    }

    #[test]
    fn expand_inputs_deduplicates_and_rejects_other_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let file = tmp.path().join("x.org");
        fs::write(&file, "* X").expect("write x");

        let found = expand_inputs(&[file.clone(), tmp.path().to_path_buf()], false)
            .expect("expand");
        assert_eq!(found, vec![fs::canonicalize(&file).expect("canonical")]);

        let txt = tmp.path().join("x.txt");
        fs::write(&txt, "* X").expect("write txt");
        assert!(expand_inputs(&[txt], false).is_err());
    }

    #[test]
    fn format_file_normalizes_headlines() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("todo.org");
        fs::write(&path, "*   TODO  [#A]  ship it   :work:\nbody text\n**  child\n")
            .expect("write");

        let formatted = format_file(
            &path,
            &ParseOptions::default(),
            &FormatOptions { tag_column: 30 },
        )
        .expect("format");
        assert_eq!(
            formatted,
            "* TODO [#A] ship it     :work:\nbody text\n** child\n"
        );
    }

    #[test]
    fn format_in_place_rewrites_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("plan.org");
        fs::write(&path, "*  NEXT call\n").expect("write");

        let args = FormatArgs {
            inputs: vec![path.clone()],
            in_place: true,
            tag_column: TAG_COLUMN,
            keywords: KeywordArgs {
                keywords: vec!["NEXT".into()],
            },
        };
        handle_format(args, false).expect("format");
        assert_eq!(fs::read_to_string(&path).expect("read"), "* NEXT call\n");
    }

    #[test]
    fn format_in_place_keeps_body_text() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("notes.org");
        fs::write(
            &path,
            "*  TODO a\nimportant body paragraph\n- [ ] list item\n\n** b\n",
        )
        .expect("write");

        let args = FormatArgs {
            inputs: vec![tmp.path().to_path_buf()],
            in_place: true,
            tag_column: TAG_COLUMN,
            keywords: KeywordArgs { keywords: vec![] },
        };
        handle_format(args, false).expect("format");
        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "* TODO a\nimportant body paragraph\n- [ ] list item\n\n** b\n"
        );
    }

    #[test]
    fn headers_follow_resolved_file_count() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("a.org"), "* A").expect("write a");
        fs::write(tmp.path().join("b.org"), "* B").expect("write b");

        // One directory argument, two files: both get a header.
        let files = expand_inputs(&[tmp.path().to_path_buf()], false).expect("expand");
        assert_eq!(files.len(), 2);
        let first = file_header(0, files.len(), &files[0]).expect("first header");
        let second = file_header(1, files.len(), &files[1]).expect("second header");
        assert!(first.starts_with("== ") && first.ends_with("a.org ==\n"));
        assert!(second.starts_with("\n== ") && second.ends_with("b.org ==\n"));

        assert_eq!(file_header(0, 1, &files[0]), None);
    }

    #[test]
    fn invalid_keywords_are_reported() {
        let args = KeywordArgs {
            keywords: vec!["".into()],
        };
        assert!(args.parse_options().is_err());
    }

    #[test]
    fn outline_view_indents_by_tree_depth() {
        let doc = orgtree::parse("* TODO [#B] a :x:\n*** b\n* c");
        assert_eq!(
            render_outline(&doc),
            "[0] TODO #B \"a\" tags=x\n  [2] \"b\"\n[0] \"c\"\n"
        );
    }
}
