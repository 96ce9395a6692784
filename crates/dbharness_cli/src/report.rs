//! Report rendering: console summary, JSON, JUnit XML and HTML.

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use console::style;
use dbharness_core::{ReportFormat, RunReport, RunSummary, ScenarioReport, ScenarioStatus};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io::Cursor;
use std::path::Path;

/// Renders `report` in `format` to `output`, or stdout.
pub fn emit(report: &RunReport, format: ReportFormat, output: Option<&Path>) -> Result<()> {
    let text = match format {
        ReportFormat::Pretty => pretty(report),
        ReportFormat::Json => json(report)?,
        ReportFormat::Junit => junit(report)?,
        ReportFormat::Html => html(report)?,
    };
    match output {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
            }
            fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
        }
        None => {
            print!("{}", text);
            Ok(())
        }
    }
}

/// One-line totals.
pub fn summary_line(report: &RunReport) -> String {
    let s = report.summary();
    let mut parts = vec![format!("{} scenarios", s.total)];
    if s.passed > 0 {
        parts.push(style(format!("{} passed", s.passed)).green().to_string());
    }
    if s.failed > 0 {
        parts.push(style(format!("{} failed", s.failed)).red().to_string());
    }
    if s.timed_out > 0 {
        parts.push(style(format!("{} timed out", s.timed_out)).red().to_string());
    }
    if s.skipped > 0 {
        parts.push(style(format!("{} skipped", s.skipped)).yellow().to_string());
    }
    format!("{} ({:.2}s)", parts.join(", "), report.elapsed().as_secs_f64())
}

/// Human-readable report grouped by feature.
pub fn pretty(report: &RunReport) -> String {
    let mut out = String::new();
    let mut current: Option<&str> = None;

    for scenario in &report.scenarios {
        let feature = scenario.feature.as_deref().unwrap_or("(no feature)");
        if current != Some(feature) {
            let _ = writeln!(out, "\n{} {}", style("Feature:").bold(), style(feature).cyan());
            current = Some(feature);
        }
        let mark = match scenario.status {
            ScenarioStatus::Passed => style("✓").green(),
            ScenarioStatus::Failed => style("✗").red(),
            ScenarioStatus::TimedOut => style("⏱").red(),
            ScenarioStatus::Skipped => style("-").yellow(),
        };
        let _ = writeln!(
            out,
            "  {} {} {}",
            mark,
            scenario.name,
            style(format!("({:.2}s, {})", scenario.elapsed.as_secs_f64(), scenario.strategy)).dim()
        );

        if let Some(failure) = &scenario.failure {
            let _ = writeln!(out, "      {} {}", style("step:").dim(), failure.step);
            let _ = writeln!(out, "      {} {}", style(failure.kind).red(), failure.message);
            if let Some(hint) = &failure.suggestion {
                let _ = writeln!(out, "      {} {}", style("hint:").yellow(), hint);
            }
        }
        if let Some(teardown) = &scenario.teardown_error {
            let _ = writeln!(out, "      {} {}", style("teardown:").red(), teardown);
        }
        for metric in &scenario.metrics {
            let _ = writeln!(
                out,
                "      {} {:.3}s",
                style(&metric.label).dim(),
                metric.elapsed.as_secs_f64()
            );
        }
        if let Some(c) = &scenario.concurrency {
            let _ = writeln!(
                out,
                "      {} {}/{} ok, {} lock conflicts, {} pool exhaustions",
                style("concurrency").dim(),
                c.succeeded,
                c.attempted,
                c.lock_conflicts,
                c.pool_exhaustions
            );
        }
    }

    let _ = writeln!(out);
    if report.dry_run {
        let _ = writeln!(out, "{}", style("Dry run: no scenario was executed.").yellow());
    }
    let _ = writeln!(
        out,
        "{} on {} ({})",
        summary_line(report),
        report.dialect,
        report.profile
    );
    out
}

#[derive(Serialize)]
struct JsonReport<'a> {
    summary: RunSummary,
    success: bool,
    #[serde(flatten)]
    report: &'a RunReport,
}

/// JSON document with a summary block.
pub fn json(report: &RunReport) -> Result<String> {
    let doc = JsonReport {
        summary: report.summary(),
        success: report.is_success(),
        report,
    };
    let mut text = serde_json::to_string_pretty(&doc).context("failed to serialize report")?;
    text.push('\n');
    Ok(text)
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

/// JUnit XML, one test suite per feature.
pub fn junit(report: &RunReport) -> Result<String> {
    let mut suites: BTreeMap<&str, Vec<&ScenarioReport>> = BTreeMap::new();
    for scenario in &report.scenarios {
        suites
            .entry(scenario.feature.as_deref().unwrap_or("scenarios"))
            .or_default()
            .push(scenario);
    }

    let summary = report.summary();
    let mut w = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    start(
        &mut w,
        "testsuites",
        &[
            ("name", "dbharness".to_string()),
            ("tests", summary.total.to_string()),
            ("failures", summary.failed.to_string()),
            ("errors", summary.timed_out.to_string()),
            ("skipped", summary.skipped.to_string()),
            ("time", format!("{:.3}", report.elapsed().as_secs_f64())),
            ("timestamp", report.started_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ],
    )?;

    for (feature, scenarios) in suites {
        let count = |status| scenarios.iter().filter(|s| s.status == status).count();
        let time: f64 = scenarios.iter().map(|s| s.elapsed.as_secs_f64()).sum();
        start(
            &mut w,
            "testsuite",
            &[
                ("name", feature.to_string()),
                ("tests", scenarios.len().to_string()),
                ("failures", count(ScenarioStatus::Failed).to_string()),
                ("errors", count(ScenarioStatus::TimedOut).to_string()),
                ("skipped", count(ScenarioStatus::Skipped).to_string()),
                ("time", format!("{:.3}", time)),
            ],
        )?;
        for scenario in scenarios {
            testcase(&mut w, feature, scenario)?;
        }
        end(&mut w, "testsuite")?;
    }
    end(&mut w, "testsuites")?;
    finish(w)
}

fn testcase(w: &mut XmlWriter, feature: &str, scenario: &ScenarioReport) -> Result<()> {
    start(
        w,
        "testcase",
        &[
            ("classname", feature.to_string()),
            ("name", scenario.name.clone()),
            ("time", format!("{:.3}", scenario.elapsed.as_secs_f64())),
        ],
    )?;
    let element = match scenario.status {
        ScenarioStatus::TimedOut => Some("error"),
        ScenarioStatus::Failed => Some("failure"),
        _ => None,
    };
    if let Some(element) = element {
        let (kind, message, body) = match &scenario.failure {
            Some(f) => (
                f.kind.to_string(),
                f.message.clone(),
                format!("step: {}\n{}", f.step, f.message),
            ),
            None => {
                let teardown = scenario.teardown_error.clone().unwrap_or_default();
                ("Teardown".to_string(), teardown.clone(), teardown)
            }
        };
        text_element(w, element, &[("type", kind), ("message", message)], &body)?;
    }
    if scenario.status == ScenarioStatus::Skipped {
        w.write_event(Event::Empty(BytesStart::new("skipped")))?;
    }
    if !scenario.metrics.is_empty() {
        let lines: Vec<String> = scenario
            .metrics
            .iter()
            .map(|m| format!("{}: {:.3}s", m.label, m.elapsed.as_secs_f64()))
            .collect();
        text_element(w, "system-out", &[], &lines.join("\n"))?;
    }
    end(w, "testcase")
}

const HTML_STYLE: &str = "body { font-family: sans-serif; margin: 2em; } \
    table { border-collapse: collapse; margin-bottom: 2em; } \
    th, td { border: 1px solid #ccc; padding: 4px 8px; text-align: left; vertical-align: top; } \
    .passed { color: #2e7d32; } .failed, .timedout { color: #c62828; } .skipped { color: #9e9e9e; }";

/// Standalone HTML page: totals, one row per scenario, then metrics.
pub fn html(report: &RunReport) -> Result<String> {
    let summary = report.summary();
    let mut w = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    w.write_event(Event::DocType(BytesText::from_escaped("html")))?;
    start(&mut w, "html", &[("lang", "en".to_string())])?;
    start(&mut w, "head", &[])?;
    w.write_event(Event::Empty(BytesStart::new("meta").with_attributes([("charset", "utf-8")])))?;
    text_element(&mut w, "title", &[], "dbharness report")?;
    text_element(&mut w, "style", &[], HTML_STYLE)?;
    end(&mut w, "head")?;

    start(&mut w, "body", &[])?;
    text_element(&mut w, "h1", &[], "dbharness report")?;
    let mut totals = format!(
        "{} scenarios: {} passed, {} failed, {} timed out, {} skipped in {:.2}s on {} ({})",
        summary.total,
        summary.passed,
        summary.failed,
        summary.timed_out,
        summary.skipped,
        report.elapsed().as_secs_f64(),
        report.dialect,
        report.profile
    );
    if report.dry_run {
        totals.push_str(". Dry run: no scenario was executed");
    }
    text_element(&mut w, "p", &[("class", "summary".to_string())], &totals)?;
    if let Some(reason) = &report.aborted {
        text_element(&mut w, "p", &[("class", "failed".to_string())], &format!("Run aborted: {}", reason))?;
    }

    start(&mut w, "table", &[("class", "scenarios".to_string())])?;
    header_row(&mut w, &["Feature", "Scenario", "Status", "Strategy", "Time (s)", "Details"])?;
    for scenario in &report.scenarios {
        let (status, class) = match scenario.status {
            ScenarioStatus::Passed => ("passed", "passed"),
            ScenarioStatus::Failed => ("failed", "failed"),
            ScenarioStatus::TimedOut => ("timed out", "timedout"),
            ScenarioStatus::Skipped => ("skipped", "skipped"),
        };
        let mut details = Vec::new();
        if let Some(f) = &scenario.failure {
            details.push(format!("{} at \"{}\": {}", f.kind, f.step, f.message));
            if let Some(hint) = &f.suggestion {
                details.push(format!("hint: {}", hint));
            }
        }
        if let Some(teardown) = &scenario.teardown_error {
            details.push(format!("teardown: {}", teardown));
        }
        start(&mut w, "tr", &[("class", class.to_string())])?;
        text_element(&mut w, "td", &[], scenario.feature.as_deref().unwrap_or(""))?;
        text_element(&mut w, "td", &[], &scenario.name)?;
        text_element(&mut w, "td", &[], status)?;
        text_element(&mut w, "td", &[], &scenario.strategy.to_string())?;
        text_element(&mut w, "td", &[], &format!("{:.3}", scenario.elapsed.as_secs_f64()))?;
        text_element(&mut w, "td", &[], &details.join("\n"))?;
        end(&mut w, "tr")?;
    }
    end(&mut w, "table")?;

    let metrics: Vec<_> = report.metrics().collect();
    if !metrics.is_empty() {
        text_element(&mut w, "h2", &[], "Metrics")?;
        start(&mut w, "table", &[("class", "metrics".to_string())])?;
        header_row(&mut w, &["Scenario", "Operation", "Time (s)", "Memory delta (KiB)"])?;
        for (scenario, metric) in metrics {
            start(&mut w, "tr", &[])?;
            text_element(&mut w, "td", &[], &scenario.qualified_name())?;
            text_element(&mut w, "td", &[], &metric.label)?;
            text_element(&mut w, "td", &[], &format!("{:.3}", metric.elapsed.as_secs_f64()))?;
            let memory = metric.memory_delta_kb.map(|kb| kb.to_string()).unwrap_or_default();
            text_element(&mut w, "td", &[], &memory)?;
            end(&mut w, "tr")?;
        }
        end(&mut w, "table")?;
    }

    end(&mut w, "body")?;
    end(&mut w, "html")?;
    finish(w)
}

fn header_row(w: &mut XmlWriter, titles: &[&str]) -> Result<()> {
    start(w, "tr", &[])?;
    for title in titles {
        text_element(w, "th", &[], title)?;
    }
    end(w, "tr")
}

fn start(w: &mut XmlWriter, name: &str, attrs: &[(&str, String)]) -> Result<()> {
    let clean: Vec<(&str, Cow<'_, str>)> = attrs.iter().map(|(k, v)| (*k, xml_safe(v))).collect();
    let element = BytesStart::new(name).with_attributes(clean.iter().map(|(k, v)| (*k, v.as_ref())));
    w.write_event(Event::Start(element))?;
    Ok(())
}

fn end(w: &mut XmlWriter, name: &str) -> Result<()> {
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn text_element(w: &mut XmlWriter, name: &str, attrs: &[(&str, String)], text: &str) -> Result<()> {
    start(w, name, attrs)?;
    w.write_event(Event::Text(BytesText::new(&xml_safe(text))))?;
    end(w, name)
}

fn finish(w: XmlWriter) -> Result<String> {
    let mut text = String::from_utf8(w.into_inner().into_inner()).context("report is not valid UTF-8")?;
    text.push('\n');
    Ok(text)
}

/// Replaces characters XML 1.0 cannot carry, such as terminal escapes in
/// driver messages.
fn xml_safe(text: &str) -> Cow<'_, str> {
    let allowed = |c: char| matches!(c, '\t' | '\n' | '\r') || (c >= ' ' && c != '\u{fffe}' && c != '\u{ffff}');
    if text.chars().all(allowed) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(
        text.chars()
            .map(|c| if allowed(c) { c } else { '\u{fffd}' })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dbharness_core::{ErrorKind, PerformanceMetric, StepFailure, StepReport, TeardownStrategy};
    use std::time::Duration;

    fn scenario(feature: &str, name: &str, status: ScenarioStatus) -> ScenarioReport {
        ScenarioReport {
            feature: Some(feature.to_string()),
            name: name.to_string(),
            tags: vec!["@dml".to_string()],
            strategy: TeardownStrategy::Rollback,
            status,
            steps: vec![StepReport {
                text: "Then the user count should be 3".to_string(),
                status,
                elapsed: Duration::from_millis(4),
            }],
            failure: None,
            teardown_error: None,
            metrics: Vec::new(),
            concurrency: None,
            elapsed: Duration::from_millis(12),
        }
    }

    fn report() -> RunReport {
        let mut failed = scenario("Users", "Count <users> & \"more\"", ScenarioStatus::Failed);
        failed.failure = Some(StepFailure {
            step: "Then the user count should be 4".to_string(),
            kind: ErrorKind::AssertionFailed,
            message: "expected users to have 4 rows, got 3 rows".to_string(),
            expected: Some("users to have 4 rows".to_string()),
            actual: Some("3 rows".to_string()),
            suggestion: None,
        });
        let mut timed = scenario("Performance", "Bulk", ScenarioStatus::Passed);
        timed.metrics.push(PerformanceMetric {
            label: "bulk insert users".to_string(),
            started_at: Utc::now(),
            ended_at: Utc::now(),
            elapsed: Duration::from_millis(250),
            memory_delta_kb: None,
            pool_in_use: Some(1),
        });
        let now = Utc::now();
        RunReport {
            started_at: now,
            finished_at: now,
            dialect: "sqlite".to_string(),
            profile: "local".to_string(),
            dry_run: false,
            scenarios: vec![
                scenario("Users", "Create", ScenarioStatus::Passed),
                failed,
                timed,
                scenario("Users", "Later", ScenarioStatus::Skipped),
            ],
            aborted: None,
        }
    }

    #[test]
    fn test_junit_counts_and_escapes() {
        let xml = junit(&report()).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("tests=\"4\" failures=\"1\" errors=\"0\" skipped=\"1\""));
        assert!(xml.contains("<testsuite name=\"Users\" tests=\"3\""));
        assert!(xml.contains("name=\"Count &lt;users&gt; &amp; &quot;more&quot;\""));
        assert!(xml.contains("<failure type=\"AssertionFailed\""));
        assert!(xml.contains("<skipped/>"));
        assert!(xml.contains("<system-out>bulk insert users: 0.250s</system-out>"));
        assert_eq!(xml.matches("<testcase ").count(), 4);
    }

    #[test]
    fn test_junit_strips_control_characters() {
        let mut run = report();
        if let Some(failure) = run.scenarios[1].failure.as_mut() {
            failure.message = "driver said \u{1b}[31mno\u{0} <way>".to_string();
        }
        let xml = junit(&run).unwrap();
        assert!(!xml.contains('\u{1b}'));
        assert!(!xml.contains('\u{0}'));
        assert!(xml.contains("driver said \u{fffd}[31mno\u{fffd} &lt;way&gt;"));

        let mut reader = quick_xml::Reader::from_str(&xml);
        let mut testcases = 0;
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) if e.name().as_ref() == b"testcase" => testcases += 1,
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => panic!("malformed report: {}", e),
            }
        }
        assert_eq!(testcases, 4);
    }

    #[test]
    fn test_html_lists_scenarios_and_metrics() {
        let page = html(&report()).unwrap();
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("4 scenarios: 2 passed, 1 failed, 0 timed out, 1 skipped"));
        assert!(page.contains("<td>Count &lt;users&gt; &amp;"));
        assert!(page.contains("<tr class=\"failed\">"));
        assert!(page.contains("<td>bulk insert users</td>"));
        assert_eq!(page.matches("<tr class=").count(), 4);
    }

    #[test]
    fn test_json_includes_summary() {
        let text = json(&report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["summary"]["total"], 4);
        assert_eq!(value["summary"]["failed"], 1);
        assert_eq!(value["success"], false);
        assert_eq!(value["scenarios"][1]["failure"]["kind"], "AssertionFailed");
        assert_eq!(value["scenarios"][2]["metrics"][0]["elapsed_s"], 0.25);
    }

    #[test]
    fn test_pretty_groups_by_feature() {
        console::set_colors_enabled(false);
        let text = pretty(&report());
        assert_eq!(text.matches("Feature: Users").count(), 2);
        assert!(text.contains("Feature: Performance"));
        assert!(text.contains("expected users to have 4 rows"));
        assert!(text.contains("bulk insert users 0.250s"));
        assert!(text.contains("4 scenarios, 2 passed, 1 failed, 1 skipped"));
    }

    #[test]
    fn test_emit_writes_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("out").join("report.xml");
        emit(&report(), ReportFormat::Junit, Some(&path)).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("<testsuites"));
    }
}
