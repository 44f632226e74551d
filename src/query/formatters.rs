use crate::repository::Transfer;
use alloy_primitives::Address;
use comfy_table::{Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use csv::Writer;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Table,
        }
    }
}

/// Wire shape of a transfer, shared by the JSON/CSV output and the HTTP API.
/// Values are decimal strings so no precision is lost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRecord {
    pub token: String,
    pub from: String,
    pub to: String,
    pub value: String,
    pub block_hash: String,
    pub transaction_hash: String,
    pub log_index: u64,
}

impl From<&Transfer> for TransferRecord {
    fn from(t: &Transfer) -> Self {
        TransferRecord {
            token: format!("{:?}", t.token_address),
            from: format!("{:?}", t.from_address),
            to: format!("{:?}", t.to_address),
            value: t.value.to_string(),
            block_hash: format!("{:?}", t.block_hash),
            transaction_hash: format!("{:?}", t.transaction_hash),
            log_index: t.log_index,
        }
    }
}

pub fn format_tokens(tokens: &[Address], format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            if tokens.is_empty() {
                return "No tokens found.".to_string();
            }
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec!["#", "Token"]);
            for (i, token) in tokens.iter().enumerate() {
                table.add_row(vec![Cell::new(i + 1), Cell::new(format!("{token:#}"))]);
            }
            table.to_string()
        }
        OutputFormat::Json => {
            let tokens: Vec<String> = tokens.iter().map(|t| format!("{t:?}")).collect();
            serde_json::to_string_pretty(&tokens).unwrap_or_else(|_| "[]".to_string())
        }
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record(["token"]);
            for token in tokens {
                let _ = wtr.write_record([format!("{token:?}")]);
            }
            String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
        }
    }
}

pub fn format_transfers(transfers: &[Transfer], format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => format_transfers_table(transfers),
        OutputFormat::Json => {
            let records: Vec<TransferRecord> = transfers.iter().map(TransferRecord::from).collect();
            serde_json::to_string_pretty(&records).unwrap_or_else(|_| "[]".to_string())
        }
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            for transfer in transfers {
                let _ = wtr.serialize(TransferRecord::from(transfer));
            }
            String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
        }
    }
}

fn format_transfers_table(transfers: &[Transfer]) -> String {
    if transfers.is_empty() {
        return "No transfers found.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Token", "From", "To", "Value", "Block", "Tx Hash", "Log"]);

    for transfer in transfers {
        table.add_row(vec![
            Cell::new(format!("{:#}", transfer.token_address)),
            Cell::new(format!("{:#}", transfer.from_address)),
            Cell::new(format!("{:#}", transfer.to_address)),
            Cell::new(transfer.value.to_string()),
            Cell::new(shorten_hash(&format!("{:?}", transfer.block_hash))),
            Cell::new(shorten_hash(&format!("{:?}", transfer.transaction_hash))),
            Cell::new(transfer.log_index),
        ]);
    }

    table.to_string()
}

fn shorten_hash(hash: &str) -> String {
    if hash.len() <= 12 {
        return hash.to_string();
    }
    format!("{}...{}", &hash[..6], &hash[hash.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{B256, U256};

    fn transfer() -> Transfer {
        Transfer {
            token_address: Address::with_last_byte(0xa1),
            from_address: Address::with_last_byte(1),
            to_address: Address::with_last_byte(2),
            value: U256::from(10).pow(U256::from(30)),
            block_hash: B256::with_last_byte(7),
            transaction_hash: B256::with_last_byte(8),
            log_index: 3,
        }
    }

    #[test]
    fn json_keeps_full_precision() {
        let output = format_transfers(&[transfer()], OutputFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed[0]["value"], "1000000000000000000000000000000");
        assert_eq!(parsed[0]["log_index"], 3);
        assert_eq!(
            parsed[0]["token"],
            "0x00000000000000000000000000000000000000a1"
        );
    }

    #[test]
    fn csv_has_header_and_rows() {
        let output = format_transfers(&[transfer(), transfer()], OutputFormat::Csv);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "token,from,to,value,block_hash,transaction_hash,log_index"
        );
    }

    #[test]
    fn empty_results_render_a_message() {
        assert_eq!(format_tokens(&[], OutputFormat::Table), "No tokens found.");
        assert_eq!(format_transfers(&[], OutputFormat::Json), "[]");
    }

    #[test]
    fn unknown_format_falls_back_to_table() {
        assert_eq!(OutputFormat::from("CSV"), OutputFormat::Csv);
        assert_eq!(OutputFormat::from("yaml"), OutputFormat::Table);
    }
}
