use super::ui;
use crate::core::analytics::{AnalysisResult, Strategy};
use crate::core::config::AppConfig;
use crate::core::currency::{DEFAULT_CURRENCIES, POPULAR_CURRENCIES};
use crate::core::engine::RateEngine;
use anyhow::{Result, bail};
use comfy_table::Cell;
use tracing::debug;

/// Which intermediate currencies to try.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateSelection {
    Listed(Vec<String>),
    Popular,
    /// Everything the rate source can quote.
    All,
    Default,
}

#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub amount: f64,
    pub from: Option<String>,
    pub to: Option<String>,
    pub selection: CandidateSelection,
    pub offline: bool,
    pub strategy: Option<Strategy>,
    pub limit: usize,
    pub verbose: bool,
}

async fn candidates(engine: &RateEngine, selection: &CandidateSelection) -> Vec<String> {
    let listed: Vec<String> = match selection {
        CandidateSelection::All => return engine.list_available_currencies().await,
        CandidateSelection::Listed(codes) => codes.clone(),
        CandidateSelection::Popular => POPULAR_CURRENCIES.iter().map(|c| c.to_string()).collect(),
        CandidateSelection::Default => DEFAULT_CURRENCIES.iter().map(|c| c.to_string()).collect(),
    };
    engine.filter_available(&listed).await
}

pub async fn run(config: &AppConfig, options: AnalyzeOptions) -> Result<()> {
    let mut config = config.clone();
    if let Some(strategy) = options.strategy {
        config.analysis.strategy = strategy;
    }
    let from = options.from.as_deref().unwrap_or(&config.from).to_string();
    let to = options.to.as_deref().unwrap_or(&config.to).to_string();

    let engine = RateEngine::from_config(&config, options.offline)?;
    if options.offline {
        println!(
            "{}",
            ui::style_text(
                "Offline mode: rates are approximate demo values, not live quotes.",
                ui::StyleType::Warning
            )
        );
    }

    let pb = ui::new_spinner("Checking available currencies...");
    let candidates = candidates(&engine, &options.selection).await;
    pb.finish_and_clear();
    if candidates.is_empty() {
        bail!("No usable currencies to analyze");
    }
    debug!(count = candidates.len(), "Candidate currencies ready");

    let pb = ui::new_spinner(&format!(
        "Analyzing {} conversion paths from {} to {}...",
        candidates.len(),
        from,
        to
    ));
    let result = engine
        .analyze(options.amount, &from, &to, &candidates)
        .await;
    pb.finish_and_clear();
    let result = result?;

    println!("{}", render_analysis(&result, options.limit));

    if options.verbose {
        let stats = engine.stats().await;
        ui::print_separator();
        println!(
            "{}",
            ui::style_text(
                &format!(
                    "Cache: {} hits, {} misses, {} fetches ({} failed), hit rate {:.1}%",
                    stats.hits,
                    stats.misses,
                    stats.fetches,
                    stats.failures,
                    stats.hit_rate()
                ),
                ui::StyleType::Subtle
            )
        );
    }
    Ok(())
}

/// Formats the ranked paths and the direct baseline, showing at most `limit` rows.
pub fn render_analysis(result: &AnalysisResult, limit: usize) -> String {
    let mut output = format!(
        "{}\n\n",
        ui::style_text(
            &format!(
                "{:.2} {} -> {} ({} strategy)",
                result.amount, result.from, result.to, result.strategy
            ),
            ui::StyleType::Title
        )
    );
    output.push_str(&format!(
        "Direct: 1 {} = {:.6} {}, {} = {:.2} {}\n\n",
        result.from,
        result.direct_rate,
        result.to,
        ui::style_text("amount", ui::StyleType::TotalLabel),
        result.direct_amount,
        result.to
    ));

    if result.paths.is_empty() {
        output.push_str(&ui::style_text(
            "No conversion path could be resolved.",
            ui::StyleType::Error,
        ));
        return output;
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("#"),
        ui::header_cell("Via"),
        ui::header_cell(&format!("{} -> Via", result.from)),
        ui::header_cell(&format!("Via -> {}", result.to)),
        ui::header_cell(&format!("Amount ({})", result.to)),
        ui::header_cell("Score"),
    ]);
    for (rank, path) in result.paths.iter().take(limit).enumerate() {
        table.add_row(vec![
            Cell::new(rank + 1),
            Cell::new(&path.intermediate),
            ui::number_cell(format!("{:.6}", path.from_rate)),
            ui::number_cell(format!("{:.6}", path.to_rate)),
            ui::number_cell(format!("{:.2}", path.amount)),
            ui::score_cell(path.efficiency_score),
        ]);
    }
    output.push_str(&table.to_string());

    if result.paths.len() > limit {
        output.push_str(&format!(
            "\n{}",
            ui::style_text(
                &format!("... {} more paths not shown", result.paths.len() - limit),
                ui::StyleType::Subtle
            )
        ));
    }

    if let Some(best) = result.best_path() {
        let savings = result.savings();
        let (label, style_type) = if savings > 0.0 {
            ("Best route", ui::StyleType::TotalValue)
        } else {
            ("No route beats direct; best", ui::StyleType::Warning)
        };
        output.push_str(&format!(
            "\n\n{}: {} -> {} -> {}, {} ({:+.2} {})",
            ui::style_text(label, ui::StyleType::TotalLabel),
            result.from,
            best.intermediate,
            result.to,
            ui::style_text(&format!("{:.2} {}", best.amount, result.to), style_type),
            savings,
            result.to
        ));
    }
    if let Some((worst, best)) = result.score_range() {
        output.push_str(&format!(
            "\n{} of {} paths beat the direct rate (scores {:+.2}% to {:+.2}%)",
            result.positive_paths(),
            result.paths.len(),
            worst,
            best
        ));
    }
    if !result.skipped.is_empty() {
        output.push_str(&format!(
            "\n{}",
            ui::style_text(
                &format!("Unavailable: {}", result.skipped.join(", ")),
                ui::StyleType::Subtle
            )
        ));
    }
    output
}
