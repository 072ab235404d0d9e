//! HTML rendering of a run's reports.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, instrument};

use super::{ExtractorReport, ReportId, ReportTree};

const STYLE: &str = "body { font-family: sans-serif; background: #f4f4f4; }
.report { border-left: 4px solid; margin: 0.4em 0; padding: 0.3em 0.6em; background: #fff; }
.report .report { margin-left: 2em; }
.success { border-color: #2e9e44; }
.error { border-color: #c62828; background: #fff4f4; }
.url { font-weight: bold; word-break: break-all; }
.code { font-family: monospace; margin-right: 1em; }";

/// Whether a report is rendered with the success style.
fn is_success(report: &ExtractorReport) -> bool {
    if report.err_code.is_error() {
        return false;
    }
    report.err_code.is_warning() || report.download_error.is_settled()
}

/// Renders one HTML document with a block per top-level report.
#[must_use]
pub fn render(tree: &ReportTree, roots: &[ReportId], generated_at: DateTime<Local>) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>gwaripper report {}</title>\n<style>\n{STYLE}\n</style>\n</head>\n<body>\n",
        generated_at.format("%Y-%m-%d %H:%M:%S")
    );
    for root in roots {
        render_block(&mut out, tree, *root, 0);
    }
    out.push_str("</body>\n</html>\n");
    out
}

fn render_block(out: &mut String, tree: &ReportTree, id: ReportId, depth: usize) {
    let report = tree.get(id);
    let class = if is_success(report) { "success" } else { "error" };
    let indent = "  ".repeat(depth);
    let _ = writeln!(out, "{indent}<div class=\"report {class}\">");
    let _ = writeln!(
        out,
        "{indent}  <div class=\"url\"><a href=\"{url}\">{url}</a></div>",
        url = escape(&report.url)
    );
    let _ = writeln!(
        out,
        "{indent}  <span class=\"code\">{}</span><span class=\"code\">{}</span>",
        report.err_code, report.download_error
    );
    for child in report.children() {
        render_block(out, tree, *child, depth + 1);
    }
    let _ = writeln!(out, "{indent}</div>");
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Writes the rendered report to `dir`, creating it if necessary.
///
/// # Errors
///
/// Returns the underlying IO error if the directory or file can't be written.
#[instrument(skip(tree, roots), fields(dir = %dir.display(), roots = roots.len()))]
pub fn write_report(
    dir: &Path,
    tree: &ReportTree,
    roots: &[ReportId],
    generated_at: DateTime<Local>,
) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "report_{}.html",
        generated_at.format("%Y-%m-%d_%H-%M-%S")
    ));
    std::fs::write(&path, render(tree, roots, generated_at))?;
    debug!(path = %path.display(), "report written");
    Ok(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::report::{DownloadErrorCode, ExtractorErrorCode};

    fn sample_tree() -> (ReportTree, Vec<ReportId>) {
        let mut tree = ReportTree::new();
        let reddit = tree.create(
            "https://www.reddit.com/r/gonewildaudio/comments/abc/title",
            ExtractorErrorCode::NoErrors,
        );
        let sgasm = tree.create("https://soundgasm.net/u/user/a", ExtractorErrorCode::NoErrors);
        tree.set_download_error(sgasm, DownloadErrorCode::Downloaded);
        let album = tree.create("https://imgur.com/a/xyz", ExtractorErrorCode::NoErrors);
        let image = tree.create("https://i.imgur.com/img.jpg", ExtractorErrorCode::NoResponse);
        tree.add_child(album, image);
        tree.add_child(reddit, sgasm);
        tree.add_child(reddit, album);
        tree.set_download_error(reddit, DownloadErrorCode::CollectionIncomplete);

        let other = tree.create("https://unknown.site/<x>", ExtractorErrorCode::NoExtractor);
        (tree, vec![reddit, other])
    }

    #[test]
    fn test_render_nests_children_inside_parent_blocks() {
        let (tree, roots) = sample_tree();
        let html = render(&tree, &roots, Local::now());

        let reddit_pos = html.find("comments/abc").unwrap();
        let album_pos = html.find("imgur.com/a/xyz").unwrap();
        let image_pos = html.find("i.imgur.com/img.jpg").unwrap();
        let other_pos = html.find("unknown.site").unwrap();
        assert!(reddit_pos < album_pos && album_pos < image_pos && image_pos < other_pos);

        // image block is indented two levels below the reddit block
        assert!(html.contains("\n    <div class=\"report error\">"));
        assert_eq!(html.matches("<div class=\"report").count(), 5);
    }

    #[test]
    fn test_render_shows_codes_and_styles() {
        let (tree, roots) = sample_tree();
        let html = render(&tree, &roots, Local::now());
        assert!(html.contains("ERROR_IN_CHILDREN"));
        assert!(html.contains("NO_EXTRACTOR"));
        assert!(html.contains("DOWNLOADED"));
        assert!(html.contains("COLLECTION_INCOMPLETE"));
        assert!(html.contains("<div class=\"report success\">"));
    }

    #[test]
    fn test_render_escapes_urls() {
        let (tree, roots) = sample_tree();
        let html = render(&tree, &roots, Local::now());
        assert!(html.contains("unknown.site/&lt;x&gt;"));
        assert!(!html.contains("unknown.site/<x>"));
    }

    #[test]
    fn test_write_report_creates_file() {
        let (tree, roots) = sample_tree();
        let dir = tempfile::tempdir().unwrap();
        let path = write_report(&dir.path().join("_reports"), &tree, &roots, Local::now()).unwrap();
        assert!(path.exists());
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.starts_with("<!DOCTYPE html>"));
    }
}
