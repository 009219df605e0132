use ciaudit_core::analyzer::report::{FileAnalysis, Finding, Severity, SkippedFile};
use ciaudit_core::analyzer::RuleDescriptor;
use ciaudit_core::audit::Diagnostic;
use ciaudit_core::config::AuditConfig;
use ciaudit_core::render::{AuditReport, Coverage, RankedEntry};
use colored::*;

/// Print the local files `lint` could not read, when there are any.
pub fn print_skipped_files(skipped: &[SkippedFile]) {
    if skipped.is_empty() {
        return;
    }
    println!(
        " {}",
        format!("{} workflow files skipped", skipped.len()).yellow().bold()
    );
    for file in skipped {
        println!("   {} {}: {}", "|-".dimmed(), file.file.cyan(), file.reason.dimmed());
    }
    println!();
}

/// Print the rule engine analysis of one local workflow file.
pub fn print_file_analysis(analysis: &FileAnalysis) {
    println!();
    println!(
        "{}",
        format!(" ciaudit v{} - Linting {}", env!("CARGO_PKG_VERSION"), analysis.file).bold()
    );
    println!();

    println!(" {}", "Workflow".bold().underline());
    if let Some(name) = &analysis.workflow_name {
        println!(" {} Name: {}", "|-".dimmed(), name.cyan());
    }
    println!(
        " {} {} jobs, {} steps",
        "|-".dimmed(),
        analysis.job_count,
        analysis.step_count
    );
    if analysis.degraded {
        println!(
            " {} {}",
            "|-".dimmed(),
            "Partially parsed, some sections were skipped".yellow()
        );
        for diagnostic in &analysis.diagnostics {
            println!("    {} {}", "|".dimmed(), diagnostic.dimmed());
        }
    }
    println!();

    if analysis.findings.is_empty() {
        println!(" {} No anti-patterns detected.", "OK".green().bold());
    } else {
        for finding in &analysis.findings {
            print_finding(finding);
        }
    }

    for failure in &analysis.rule_failures {
        println!(" {} {}", " SKIPPED ".dimmed(), failure.dimmed());
    }

    println!();
    println!(
        " {} warnings, {} info",
        count_label(analysis.warning_count(), Severity::Warning),
        count_label(analysis.info_count(), Severity::Info),
    );
    println!();
}

fn print_finding(finding: &Finding) {
    let severity_tag = severity_tag(finding.severity);
    match &finding.tag {
        Some(tag) => println!(
            " {} [{}/{}] {}",
            severity_tag,
            finding.rule.dimmed(),
            tag.dimmed(),
            finding.message
        ),
        None => println!(" {} [{}] {}", severity_tag, finding.rule.dimmed(), finding.message),
    }
}

fn severity_tag(severity: Severity) -> String {
    match severity {
        Severity::Warning => format!(" {} ", severity.symbol())
            .on_yellow()
            .black()
            .bold()
            .to_string(),
        Severity::Info => format!(" {} ", severity.symbol()).on_blue().white().to_string(),
    }
}

fn count_label(count: usize, severity: Severity) -> String {
    if count == 0 {
        return "0".to_string();
    }
    match severity {
        Severity::Warning => count.to_string().yellow().bold().to_string(),
        Severity::Info => count.to_string().cyan().to_string(),
    }
}

/// Print the fleet audit report.
pub fn print_audit_report(report: &AuditReport, config: &AuditConfig) {
    println!("{}", "━".repeat(70).bright_black());
    println!(
        "{}",
        format!(
            " ciaudit v{} - {} workflows, {} runs in the last {} days",
            env!("CARGO_PKG_VERSION"),
            report.workflow_count,
            report.total_runs,
            config.window_days
        )
        .bold()
        .cyan()
    );
    println!("{}", "━".repeat(70).bright_black());
    println!();

    print_ranked(
        &format!("Busiest workflows (top {})", config.top_n),
        &report.busiest,
        |e| format!("{} runs", e.total),
    );
    print_ranked(
        &format!("Schedule-heavy workflows (> {} scheduled runs)", config.schedule_threshold),
        &report.schedule_heavy,
        |e| format!("{} scheduled of {}", e.count, e.total),
    );
    print_ranked(
        &format!(
            "Push-dominant workflows (> {:.0}% push, >= {} runs)",
            config.push_dominant_ratio * 100.0,
            config.push_dominant_min_runs
        ),
        &report.push_dominant,
        |e| format!("{:.0}% push of {}", e.metric * 100.0, e.total),
    );
    print_ranked(
        &format!("High failure rate (> {:.0}%)", config.failure_ratio * 100.0),
        &report.high_failure,
        |e| format!("{:.0}% failed ({} of {})", e.metric * 100.0, e.count, e.total),
    );
    print_ranked(
        &format!("High cancellation rate (> {:.0}%)", config.cancel_ratio * 100.0),
        &report.high_cancellation,
        |e| format!("{:.0}% cancelled ({} of {})", e.metric * 100.0, e.count, e.total),
    );

    println!("{}", " Findings by rule".bold());
    for count in &report.rule_counts {
        let total = if count.total > 0 {
            count.total.to_string().yellow().bold().to_string()
        } else {
            "0".dimmed().to_string()
        };
        println!(
            "   {:<24} {:>5}   ({} warning, {} info)",
            count.rule, total, count.warnings, count.infos
        );
    }
    println!("   {:<24} {:>5}", "Total".bold(), report.total_findings);
    println!();

    println!("{}", " Expensive runners".bold());
    println!(
        "   {} on all pushes or pull requests, {} limited to protected branches",
        report.expensive_runners.on_all.to_string().red().bold(),
        report.expensive_runners.limited.to_string().green()
    );
    for (tag, split) in &report.expensive_runners_by_tag {
        println!(
            "   {} {}: {} on all, {} limited",
            "|-".dimmed(),
            tag,
            split.on_all,
            split.limited
        );
    }
    println!();

    print_coverage(&report.coverage);
}

fn print_ranked(title: &str, entries: &[RankedEntry], detail: impl Fn(&RankedEntry) -> String) {
    println!("{}", format!(" {}", title).bold());
    if entries.is_empty() {
        println!("   {}", "none".dimmed());
    }
    for (i, entry) in entries.iter().enumerate() {
        println!(
            "   {:>2}. {} {} {}",
            i + 1,
            entry.repository.cyan(),
            entry.workflow,
            format!("({})", detail(entry)).dimmed()
        );
    }
    println!();
}

fn print_coverage(coverage: &Coverage) {
    println!("{}", " Coverage".bold());
    println!(
        "   {} of {} repositories audited, {} workflow files analyzed",
        coverage.repositories_audited, coverage.repositories_requested, coverage.files_analyzed
    );
    if coverage.owners_skipped > 0 {
        println!(
            "   {}",
            format!(
                "{} of {} owners could not be listed",
                coverage.owners_skipped, coverage.owners_requested
            )
            .yellow()
        );
    }
    if coverage.repositories_skipped > 0 {
        println!(
            "   {}",
            format!(
                "{} repositories skipped due to fetch failure",
                coverage.repositories_skipped
            )
            .yellow()
        );
    }
    if coverage.files_skipped > 0 {
        println!(
            "   {}",
            format!("{} workflow files could not be fetched", coverage.files_skipped).yellow()
        );
    }
    if coverage.degraded_documents > 0 {
        println!(
            "   {} workflow files were only partially parsed",
            coverage.degraded_documents
        );
    }
    if coverage.rule_failures > 0 {
        println!("   {} rule evaluations failed", coverage.rule_failures);
    }
    if coverage.cancelled {
        println!(
            "   {}",
            format!(
                "Interrupted: {} repositories not started, report is partial",
                coverage.repositories_cancelled
            )
            .red()
            .bold()
        );
    }
    println!();
}

/// Print diagnostics collected during the audit, when there are any.
pub fn print_diagnostics(diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }
    println!("{}", format!(" Diagnostics ({})", diagnostics.len()).bold());
    for diagnostic in diagnostics {
        let location = match &diagnostic.file {
            Some(file) => format!("{}/{}", diagnostic.repository, file),
            None => diagnostic.repository.clone(),
        };
        println!(
            "   {} {} {}",
            format!("{:?}", diagnostic.kind).dimmed(),
            location.cyan(),
            diagnostic.message
        );
    }
    println!();
}

/// Print the registered rules in evaluation order.
pub fn print_rules(rules: &[RuleDescriptor]) {
    println!();
    println!("{}", format!(" {} detection rules", rules.len()).bold());
    println!();
    for rule in rules {
        println!("   {:<24} {}", rule.id.cyan(), rule.summary);
    }
    println!();
}
