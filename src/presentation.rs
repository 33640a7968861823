//! Receipt and market-update text
//!
//! Pure formatting. Every input field is optional and has a literal default,
//! so rendering never fails. Market figures are illustrative and drawn from a
//! caller-supplied `Rng` so tests can seed it.

use crate::models::{BankAccount, ReceiptDetails};
use chrono::{DateTime, Utc};
use rand::Rng;

pub const DEFAULT_STATUS: &str = "Processing";
pub const DEFAULT_TOKEN: &str = "USDT";
pub const DEFAULT_AMOUNT: &str = "0";
pub const DEFAULT_CURRENCY: &str = "NGN";
pub const PENDING: &str = "Pending";
pub const NOT_PROVIDED: &str = "Not provided";

pub fn render_receipt(details: &ReceiptDetails) -> String {
    render_receipt_at(details, Utc::now())
}

/// Render with an explicit clock; `now` is used only when the receipt has no timestamp.
pub fn render_receipt_at(details: &ReceiptDetails, now: DateTime<Utc>) -> String {
    let or = |value: &Option<String>, default: &'static str| -> String {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(default)
            .to_string()
    };

    let token = or(&details.token_in, DEFAULT_TOKEN);
    let currency = or(&details.fiat_currency, DEFAULT_CURRENCY);
    let timestamp = details.timestamp.unwrap_or(now);

    let mut out = String::new();
    out.push_str("🧾 Transaction Receipt\n\n");
    out.push_str(&format!("Status: {}\n", or(&details.status, DEFAULT_STATUS)));
    out.push_str(&format!("Transaction ID: {}\n", or(&details.transaction_id, PENDING)));
    out.push_str(&format!("Transaction Hash: {}\n\n", or(&details.tx_hash, PENDING)));
    out.push_str(&format!(
        "Amount Sent: {} {}\n",
        or(&details.amount_in, DEFAULT_AMOUNT),
        token
    ));
    out.push_str(&format!(
        "Amount Received: {} {}\n\n",
        or(&details.fiat_amount, DEFAULT_AMOUNT),
        currency
    ));
    out.push_str(&render_bank(details.bank_account.as_ref()));
    out.push_str(&format!("\nDate: {}\n", timestamp.format("%Y-%m-%d %H:%M:%S UTC")));

    out
}

fn render_bank(account: Option<&BankAccount>) -> String {
    match account {
        Some(account) => format!(
            "Bank: {}\nAccount: {} ({})\n",
            account.bank_name,
            mask_account_number(&account.account_number),
            account.account_name
        ),
        None => format!("Bank: {}\n", NOT_PROVIDED),
    }
}

/// Keep the last four characters visible.
fn mask_account_number(number: &str) -> String {
    let chars: Vec<char> = number.chars().collect();
    if chars.len() <= 4 {
        return number.to_string();
    }
    let visible: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), visible)
}

pub fn render_market_update<R: Rng + ?Sized>(symbol: &str, rng: &mut R) -> String {
    render_market_update_at(symbol, Utc::now(), rng)
}

pub fn render_market_update_at<R: Rng + ?Sized>(
    symbol: &str,
    now: DateTime<Utc>,
    rng: &mut R,
) -> String {
    let symbol = match symbol.trim() {
        "" => DEFAULT_TOKEN.to_string(),
        s => s.to_ascii_uppercase(),
    };

    let price_usd: f64 = rng.gen_range(0.995..1.005);
    let change_24h: f64 = rng.gen_range(-0.5..0.5);
    let volume_bn: f64 = rng.gen_range(20.0..60.0);
    let ngn_rate: f64 = rng.gen_range(1450.0..1650.0);

    let trend = if change_24h >= 0.0 { "📈" } else { "📉" };

    format!(
        "{trend} {symbol} Market Update\n\n\
         Price: ${price_usd:.4}\n\
         24h Change: {change_24h:+.2}%\n\
         24h Volume: ${volume_bn:.1}B\n\
         {symbol}/NGN: ₦{ngn_rate:.2}\n\n\
         Updated: {}\n\
         Figures are illustrative.",
        now.format("%Y-%m-%d %H:%M UTC")
    )
}
