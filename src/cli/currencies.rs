use super::ui;
use crate::core::config::AppConfig;
use crate::core::currency::POPULAR_CURRENCIES;
use crate::core::engine::RateEngine;
use anyhow::Result;

const PER_LINE: usize = 12;

/// Prints the currencies the configured source can quote.
pub async fn run(config: &AppConfig, offline: bool) -> Result<()> {
    let engine = RateEngine::from_config(config, offline)?;

    let pb = ui::new_spinner(&format!("Asking {} source for currencies...", engine.source_name()));
    let currencies = engine.list_available_currencies().await;
    pb.finish_and_clear();

    println!("{}", render_currencies(&currencies));
    Ok(())
}

pub fn render_currencies(currencies: &[String]) -> String {
    let mut output = format!(
        "{}\n\n",
        ui::style_text(
            &format!("{} currencies available", currencies.len()),
            ui::StyleType::Title
        )
    );
    for line in currencies.chunks(PER_LINE) {
        let codes: Vec<String> = line
            .iter()
            .map(|code| {
                if POPULAR_CURRENCIES.contains(&code.as_str()) {
                    ui::style_text(code, ui::StyleType::TotalLabel)
                } else {
                    code.clone()
                }
            })
            .collect();
        output.push_str(&codes.join(" "));
        output.push('\n');
    }
    output
}
