//! HTML report generator.
//!
//! Produces self-contained HTML files with styles and scripts inlined.
//! Every result row carries its percentile band as a CSS class, and the
//! stylesheet derives band colours from the catalog.

use anyhow::Result;
use std::fmt::Write as _;
use std::path::Path;

use aptitude_core::catalog::{CompositeIndex, PercentileBand};
use aptitude_core::comparative::ComparativeAnalysis;
use aptitude_core::report::SubjectReport;

const NO_BAND: &str = "band-none";

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

fn band_class(band: Option<PercentileBand>) -> String {
    match band {
        Some(b) => format!("band-{}", b.label().to_lowercase().replace(' ', "-")),
        None => NO_BAND.to_string(),
    }
}

/// Left edge of a band on a 0-100 axis; bands meet without gaps.
fn band_start(band: PercentileBand) -> f64 {
    let (lower, _) = band.range();
    (lower - 1.0).max(0.0)
}

fn band_cell(band: Option<PercentileBand>) -> String {
    match band {
        Some(b) => format!(
            "<td data-value=\"{}\"><span class=\"chip\"></span>{}</td>",
            b as usize,
            b.label()
        ),
        None => "<td data-value=\"-1\">-</td>".to_string(),
    }
}

/// One `--band` custom property per band, plus the legend colours.
fn band_styles() -> String {
    let mut css = String::new();
    for band in PercentileBand::all() {
        let _ = writeln!(
            css,
            ".{} {{ --band: {}; }}",
            band_class(Some(*band)),
            band.color()
        );
    }
    let _ = writeln!(css, ".{NO_BAND} {{ --band: transparent; }}");
    css
}

fn band_legend() -> String {
    let mut html = String::from("<ul class=\"legend\">\n");
    for band in PercentileBand::all() {
        let (lower, upper) = band.range();
        let _ = writeln!(
            html,
            "<li class=\"{}\"><span class=\"chip\"></span>{} <small>PC {lower:.0}-{upper:.0}</small></li>",
            band_class(Some(*band)),
            band.label()
        );
    }
    html.push_str("</ul>\n");
    html
}

fn open_document(html: &mut String, title: &str) {
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("<meta charset=\"utf-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    let _ = writeln!(html, "<title>{}</title>", html_escape(title));
    html.push_str("<style>\n");
    html.push_str(CSS);
    html.push_str(&band_styles());
    html.push_str("</style>\n");
    html.push_str("</head>\n<body>\n<main>\n");
}

fn close_document(html: &mut String, raw_json: String) {
    html.push_str("<details class=\"raw-data\">\n<summary>Source data (JSON)</summary>\n<pre>");
    html.push_str(&html_escape(&raw_json));
    html.push_str("</pre>\n</details>\n");
    html.push_str("</main>\n<script>\n");
    html.push_str(JS);
    html.push_str("</script>\n</body>\n</html>");
}

fn card(html: &mut String, label: &str, value: &str, class: &str) {
    let _ = writeln!(
        html,
        "<div class=\"card {class}\"><span>{label}</span><strong>{value}</strong></div>"
    );
}

/// Generate an HTML document for one subject report.
pub fn generate_html(report: &SubjectReport) -> String {
    let mut html = String::new();
    let summary = &report.summary;
    let subject_name = report.subject.full_name();
    open_document(&mut html, &format!("{} - {}", report.title, subject_name));

    let _ = writeln!(
        html,
        "<header>\n<h1>{}</h1>\n<p class=\"meta\">{} &middot; {} &middot; generated {}</p>\n</header>",
        html_escape(&report.title),
        html_escape(&subject_name),
        html_escape(
            report
                .subject
                .external_id
                .as_deref()
                .unwrap_or("no external id")
        ),
        report.generated_at.format("%Y-%m-%d %H:%M UTC")
    );

    html.push_str("<section class=\"cards\">\n");
    card(
        &mut html,
        "Average PC",
        &summary.avg_percentile.to_string(),
        &band_class(summary.overall_band),
    );
    card(
        &mut html,
        "Overall band",
        summary.overall_band.map(|b| b.label()).unwrap_or("-"),
        &band_class(summary.overall_band),
    );
    card(&mut html, "Aptitudes", &summary.result_count.to_string(), NO_BAND);
    card(
        &mut html,
        "High / Medium / Low",
        &format!(
            "{} / {} / {}",
            summary.band_counts.high, summary.band_counts.medium, summary.band_counts.low
        ),
        NO_BAND,
    );
    html.push_str("</section>\n");

    html.push_str("<section>\n<h2>Composite indices</h2>\n<table class=\"sortable\">\n");
    html.push_str("<thead><tr><th>Index</th><th>PC</th><th>Band</th></tr></thead>\n<tbody>\n");
    for index in CompositeIndex::ALL {
        let value = summary.composite_indices.get(index);
        let band = PercentileBand::from_percentile(value as f64);
        let _ = writeln!(
            html,
            "<tr class=\"{}\"><td>{}</td><td>{value}</td>{}</tr>",
            band_class(band),
            index.label(),
            band_cell(band)
        );
    }
    html.push_str("</tbody></table>\n</section>\n");

    html.push_str("<section>\n<h2>Percentile profile</h2>\n");
    html.push_str(&band_legend());
    html.push_str(&profile_chart(
        report
            .lines
            .iter()
            .filter_map(|l| l.percentile.map(|p| (l.aptitude_code.as_str(), p, l.band))),
    ));
    html.push_str("</section>\n");

    html.push_str("<section>\n<h2>Results</h2>\n<table class=\"sortable\">\n");
    html.push_str("<thead><tr><th>Aptitude</th><th>PD</th><th>PC</th><th>Band</th><th>Accuracy</th><th>s/item</th></tr></thead>\n<tbody>\n");
    for line in &report.lines {
        let _ = writeln!(
            html,
            "<tr class=\"{}\"><td>{} ({})</td><td>{}</td><td data-value=\"{}\">{}</td>{}<td>{}%</td><td>{:.1}</td></tr>",
            band_class(line.band),
            html_escape(&line.aptitude_name),
            html_escape(&line.aptitude_code),
            line.raw_score
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".into()),
            line.percentile.unwrap_or(-1.0),
            line.percentile
                .map(|v| format!("{v:.0}"))
                .unwrap_or_else(|| "-".into()),
            band_cell(line.band),
            line.accuracy_pct,
            line.time_per_item,
        );
    }
    html.push_str("</tbody></table>\n</section>\n");

    if !report.interpretations.is_empty() || !report.missing_interpretations.is_empty() {
        html.push_str("<section class=\"interpretation\">\n<h2>Interpretation</h2>\n<dl>\n");
        for (code, text) in &report.interpretations {
            let _ = writeln!(
                html,
                "<dt>{}</dt><dd>{}</dd>",
                html_escape(code),
                html_escape(text)
            );
        }
        html.push_str("</dl>\n");
        if !report.missing_interpretations.is_empty() {
            let _ = writeln!(
                html,
                "<p class=\"meta\">No interpretation available for: {}</p>",
                html_escape(&report.missing_interpretations.join(", "))
            );
        }
        html.push_str("</section>\n");
    }

    if !report.consistency.warnings.is_empty() {
        html.push_str("<section class=\"warnings\">\n<h2>Warnings</h2>\n<ul>\n");
        for w in &report.consistency.warnings {
            let _ = writeln!(html, "<li>{}</li>", html_escape(w));
        }
        html.push_str("</ul>\n</section>\n");
    }

    close_document(
        &mut html,
        serde_json::to_string_pretty(report).unwrap_or_default(),
    );
    html
}

/// Generate an HTML document for a comparative analysis.
pub fn generate_comparison_html(analysis: &ComparativeAnalysis) -> String {
    let mut html = String::new();
    open_document(&mut html, &format!("Comparison by {}", analysis.grouping));

    let flagged = analysis.significant_differences.len() + analysis.significant_composites.len();
    let _ = writeln!(
        html,
        "<header>\n<h1>Comparison by {}</h1>\n<p class=\"meta\">{} groups &middot; {} significant differences &middot; {} subjects excluded</p>\n</header>",
        analysis.grouping,
        analysis.groups.len(),
        flagged,
        analysis.excluded_subjects.len()
    );

    html.push_str("<section>\n<h2>Group means</h2>\n<table class=\"sortable\">\n<thead><tr>");
    html.push_str("<th>Group</th><th>Subjects</th><th>Avg PC</th>");
    for index in CompositeIndex::ALL {
        let _ = write!(html, "<th>{}</th>", index.label());
    }
    html.push_str("</tr></thead>\n<tbody>\n");
    for g in &analysis.groups {
        let _ = write!(
            html,
            "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{:.1}</td>",
            band_class(PercentileBand::from_percentile(g.avg_percentile)),
            html_escape(&g.group),
            g.subject_count,
            g.avg_percentile
        );
        for index in CompositeIndex::ALL {
            let v = g.composite_indices.get(&index).copied().unwrap_or(0.0);
            let _ = write!(html, "<td>{v:.1}</td>");
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</tbody></table>\n</section>\n");

    if flagged > 0 {
        html.push_str("<section class=\"warnings\">\n<h2>Significant differences</h2>\n<table class=\"sortable\">\n");
        html.push_str("<thead><tr><th>Measure</th><th>Spread</th><th>Highest</th><th>Lowest</th></tr></thead>\n<tbody>\n");
        let rows = analysis
            .significant_differences
            .iter()
            .map(|d| (html_escape(&d.aptitude_code), d.spread, &d.highest_group, &d.lowest_group))
            .chain(analysis.significant_composites.iter().map(|d| {
                (
                    format!("{} index", d.index.label()),
                    d.spread,
                    &d.highest_group,
                    &d.lowest_group,
                )
            }));
        for (measure, spread, high, low) in rows {
            let _ = writeln!(
                html,
                "<tr class=\"flag\"><td>{measure}</td><td>{spread:.1}</td><td>{}</td><td>{}</td></tr>",
                html_escape(high),
                html_escape(low)
            );
        }
        html.push_str("</tbody></table>\n</section>\n");
    }

    close_document(
        &mut html,
        serde_json::to_string_pretty(analysis).unwrap_or_default(),
    );
    html
}

/// Write an HTML subject report to a file.
pub fn write_html_report(report: &SubjectReport, path: &Path) -> Result<()> {
    write_file(path, generate_html(report))
}

/// Write an HTML comparative analysis to a file.
pub fn write_comparison_html(analysis: &ComparativeAnalysis, path: &Path) -> Result<()> {
    write_file(path, generate_comparison_html(analysis))
}

fn write_file(path: &Path, html: String) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, html)?;
    Ok(())
}

const PROFILE_LABEL: f64 = 60.0;
const PROFILE_WIDTH: f64 = 500.0;
const PROFILE_ROW: f64 = 26.0;
const PROFILE_TOP: f64 = 18.0;

/// Percentile profile: band zones across a 0-100 axis, one marker per
/// aptitude, joined top to bottom.
fn profile_chart<'a>(
    points: impl Iterator<Item = (&'a str, f64, Option<PercentileBand>)>,
) -> String {
    let points: Vec<_> = points.collect();
    if points.is_empty() {
        return String::new();
    }
    let x_of = |pc: f64| PROFILE_LABEL + pc.clamp(0.0, 100.0) / 100.0 * PROFILE_WIDTH;
    let height = PROFILE_TOP + points.len() as f64 * PROFILE_ROW;

    let mut svg = format!(
        "<svg class=\"profile\" viewBox=\"0 0 {} {height}\" role=\"img\" aria-label=\"Percentile profile\">\n",
        PROFILE_LABEL + PROFILE_WIDTH + 10.0
    );
    for band in PercentileBand::all() {
        let (_, upper) = band.range();
        let x = x_of(band_start(*band));
        let _ = writeln!(
            svg,
            "  <rect class=\"zone {}\" x=\"{x:.1}\" y=\"{PROFILE_TOP}\" width=\"{:.1}\" height=\"{:.1}\"/>",
            band_class(Some(*band)),
            x_of(upper) - x,
            height - PROFILE_TOP
        );
    }
    for tick in [0.0, 25.0, 50.0, 75.0, 100.0] {
        let _ = writeln!(
            svg,
            "  <text class=\"tick\" x=\"{:.1}\" y=\"12\">{tick:.0}</text>",
            x_of(tick)
        );
    }

    let centre = |i: usize| PROFILE_TOP + (i as f64 + 0.5) * PROFILE_ROW;
    let path: Vec<String> = points
        .iter()
        .enumerate()
        .map(|(i, (_, pc, _))| format!("{:.1},{:.1}", x_of(*pc), centre(i)))
        .collect();
    let _ = writeln!(svg, "  <polyline class=\"trace\" points=\"{}\"/>", path.join(" "));

    for (i, (code, pc, band)) in points.iter().enumerate() {
        let y = centre(i);
        let _ = writeln!(
            svg,
            "  <text class=\"axis\" x=\"{:.1}\" y=\"{y:.1}\">{}</text>",
            PROFILE_LABEL - 8.0,
            html_escape(code)
        );
        let _ = writeln!(
            svg,
            "  <circle class=\"{}\" cx=\"{:.1}\" cy=\"{y:.1}\" r=\"6\"><title>{} PC {pc:.0}</title></circle>",
            band_class(*band),
            x_of(*pc),
            html_escape(code)
        );
    }

    svg.push_str("</svg>\n");
    svg
}

const CSS: &str = r#"
:root { --ink: #1f2933; --muted: #616e7c; --line: #d9e2ec; --paper: #ffffff; --alert: #fff4e5; }
@media (prefers-color-scheme: dark) {
  :root { --ink: #e4e7eb; --muted: #9aa5b1; --line: #323f4b; --paper: #121a22; --alert: #4a2c0a; }
}
body { margin: 0; background: var(--paper); color: var(--ink); font: 15px/1.5 system-ui, sans-serif; }
main { max-width: 960px; margin: 0 auto; padding: 1.5rem; }
header h1 { margin-bottom: 0.25rem; }
.meta, small { color: var(--muted); }
.cards { display: grid; grid-template-columns: repeat(auto-fit, minmax(180px, 1fr)); gap: 0.75rem; }
.card { border: 1px solid var(--line); border-top: 4px solid var(--band, var(--line)); border-radius: 6px; padding: 0.75rem; }
.card span { display: block; color: var(--muted); font-size: 0.8rem; text-transform: uppercase; }
.card strong { font-size: 1.4rem; }
table { width: 100%; border-collapse: collapse; margin: 0.75rem 0; }
th, td { padding: 0.4rem 0.75rem; border-bottom: 1px solid var(--line); text-align: left; }
tbody tr { box-shadow: inset 5px 0 0 var(--band, transparent); }
table.sortable th { cursor: pointer; user-select: none; }
th[data-dir="up"]::after { content: " \25B2"; }
th[data-dir="down"]::after { content: " \25BC"; }
.chip { display: inline-block; width: 0.75rem; height: 0.75rem; margin-right: 0.4rem; border-radius: 2px; background: var(--band); vertical-align: -1px; }
.legend { display: flex; flex-wrap: wrap; gap: 0.5rem 1rem; padding: 0; list-style: none; }
.profile { width: 100%; max-width: 620px; }
.profile .zone { fill: var(--band); opacity: 0.18; }
.profile circle { fill: var(--band); stroke: var(--ink); stroke-width: 1; }
.profile .trace { fill: none; stroke: var(--muted); stroke-width: 1.5; }
.profile text { fill: currentColor; font-size: 11px; dominant-baseline: middle; }
.profile .axis { text-anchor: end; }
.profile .tick { text-anchor: middle; fill: var(--muted); }
.flag { background: var(--alert); }
dt { font-weight: 600; margin-top: 0.5rem; }
.raw-data pre { overflow-x: auto; padding: 0.75rem; border: 1px solid var(--line); font-size: 0.8rem; }
"#;

const JS: &str = r#"
document.querySelectorAll('table.sortable').forEach(table => {
  const headers = Array.from(table.tHead.rows[0].cells);
  const key = (row, col) => {
    const cell = row.cells[col];
    const raw = cell.dataset.value ?? cell.textContent.trim();
    const num = Number.parseFloat(raw);
    return Number.isNaN(num) ? raw : num;
  };
  headers.forEach((th, col) => th.addEventListener('click', () => {
    const dir = th.dataset.dir === 'up' ? 'down' : 'up';
    headers.forEach(h => delete h.dataset.dir);
    th.dataset.dir = dir;
    const sign = dir === 'up' ? 1 : -1;
    const body = table.tBodies[0];
    Array.from(body.rows)
      .sort((a, b) => {
        const ka = key(a, col), kb = key(b, col);
        return typeof ka === 'number' && typeof kb === 'number'
          ? sign * (ka - kb)
          : sign * String(ka).localeCompare(String(kb));
      })
      .forEach(row => body.appendChild(row));
  }));
});
"#;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use aptitude_core::aggregate::IndexAggregator;
    use aptitude_core::catalog::AptitudeCatalog;
    use aptitude_core::comparative::{compare_groups, GroupingKey};
    use aptitude_core::model::{RawResult, Subject};
    use aptitude_core::report::ReportLine;
    use aptitude_core::scoring::{validate_consistency, ScoreProcessor};
    use chrono::{NaiveDate, Utc};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    pub(crate) fn make_test_report() -> SubjectReport {
        let catalog = Arc::new(AptitudeCatalog::default());
        let batch = ScoreProcessor::new(Arc::clone(&catalog)).process_many(&[
            RawResult::new("s1", "V")
                .with_raw_score(30)
                .with_percentile(97.0)
                .with_counts(30, 2, 0)
                .with_elapsed(600.0),
            RawResult::new("s1", "R")
                .with_raw_score(8)
                .with_percentile(3.0)
                .with_counts(8, 10, 2)
                .with_elapsed(400.0),
        ]);
        let summary = IndexAggregator::new(catalog).summarize("s1", &batch.valid_results);
        SubjectReport {
            id: uuid::Uuid::nil(),
            title: "Aptitude report".into(),
            generated_at: Utc::now(),
            subject: Subject {
                id: "s1".into(),
                name: "Ana".into(),
                surname: "O'Neil <Ruiz>".into(),
                external_id: Some("12345678".into()),
                gender: None,
                birth_date: None,
                institution: Some("North".into()),
            },
            lines: batch.valid_results.iter().map(ReportLine::from).collect(),
            consistency: validate_consistency(&batch.valid_results),
            summary,
            interpretations: BTreeMap::from([(
                "V".to_string(),
                "Strong verbal reasoning.".to_string(),
            )]),
            missing_interpretations: vec!["R".into()],
        }
    }

    #[test]
    fn html_report_contains_required_elements() {
        let html = generate_html(&make_test_report());

        assert!(html.contains("<html"));
        assert!(html.contains("</html>"));
        assert!(html.contains("Verbal (V)"));
        assert!(html.contains("Strong verbal reasoning."));
        assert!(html.contains("No interpretation available for: R"));
        assert!(html.contains("Fluid intelligence"));
    }

    #[test]
    fn rows_are_coloured_by_band() {
        let html = generate_html(&make_test_report());
        assert!(html.contains("<tr class=\"band-very-high\"><td>Verbal (V)</td>"));
        assert!(html.contains("<tr class=\"band-very-low\">"));
        assert!(html.contains(&format!(
            ".band-very-high {{ --band: {}; }}",
            PercentileBand::VeryHigh.color()
        )));
    }

    #[test]
    fn profile_chart_marks_each_percentile() {
        let html = generate_html(&make_test_report());
        assert!(html.contains("<svg class=\"profile\""));
        assert_eq!(html.matches("<rect class=\"zone ").count(), PercentileBand::all().len());
        assert!(html.contains("<title>V PC 97</title>"));
        assert!(html.contains("<title>R PC 3</title>"));
        assert!(html.contains("Very High <small>PC 95-100</small>"));
    }

    #[test]
    fn subject_names_are_escaped() {
        let html = generate_html(&make_test_report());
        assert!(html.contains("O&#x27;Neil &lt;Ruiz&gt;"));
        assert!(!html.contains("<Ruiz>"));
    }

    #[test]
    fn comparison_html_lists_groups() {
        let report = make_test_report();
        let mut other = report.subject.clone();
        other.id = "s2".into();
        other.institution = Some("South".into());
        let analysis = compare_groups(
            &[
                (report.subject.clone(), report.summary.clone()),
                (other, report.summary.clone()),
            ],
            GroupingKey::Institution,
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        );

        let html = generate_comparison_html(&analysis);
        assert!(html.contains("Comparison by institution"));
        assert!(!html.contains("Significant differences</h2>"));
        assert!(html.contains("<td>North</td>"));
        assert!(html.contains("<td>South</td>"));
    }

    #[test]
    fn comparison_html_flags_composite_differences() {
        let report = make_test_report();
        let mut low = report.summary.clone();
        low.avg_percentile -= 40;
        low.composite_indices.general -= 40;
        let mut other = report.subject.clone();
        other.id = "s2".into();
        other.institution = Some("South".into());
        let analysis = compare_groups(
            &[
                (report.subject.clone(), report.summary.clone()),
                (other, low),
            ],
            GroupingKey::Institution,
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        );

        let html = generate_comparison_html(&analysis);
        assert!(html.contains(&format!(
            "<tr class=\"flag\"><td>{} index</td><td>40.0</td><td>North</td><td>South</td></tr>",
            CompositeIndex::General.label()
        )));
    }

    #[test]
    fn html_report_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("report.html");

        write_html_report(&make_test_report(), &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("<html"));
    }
}
