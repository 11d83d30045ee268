use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::ledger::{LedgerEntry, SlotKey};
use crate::model::{AppliesTo, Command, Discount, Promotion, RankReward, Target, Visibility, VoucherTemplate};
use crate::rank::RankTable;
use crate::Amount;

/// Errors that can occur when reading csv input
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("cannot open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized event type '{kind}'")]
    UnrecognizedType { line: usize, kind: String },

    #[error("line {line}: {kind} missing {field}")]
    MissingField {
        line: usize,
        kind: String,
        field: &'static str,
    },

    #[error("line {line}: invalid {field} '{value}'")]
    InvalidField {
        line: usize,
        field: &'static str,
        value: String,
    },
}

#[derive(Debug, Deserialize)]
struct VoucherRow {
    id: String,
    code: String,
    kind: String,
    value: i64,
    min_order: Option<Amount>,
    max_discount: Option<Amount>,
    applies_to: String,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
    active: bool,
    /// Space-separated user ids, empty for a public voucher.
    assigned_users: Option<String>,
    total_quantity: Option<u32>,
    /// Slots granted to each assigned user.
    per_user_quantity: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RewardRow {
    id: String,
    title: String,
    description: Option<String>,
    rank: String,
    code_prefix: String,
    kind: String,
    value: i64,
    min_order: Option<Amount>,
    max_discount: Option<Amount>,
    applies_to: String,
    valid_days: i64,
}

#[derive(Debug, Deserialize)]
struct EventRow {
    r#type: String,
    user: String,
    r#ref: Option<String>,
    amount: Option<Amount>,
    target: Option<String>,
}

#[derive(Debug, Serialize)]
struct LedgerRow<'a> {
    voucher: &'a str,
    user: &'a str,
    consumed: u32,
}

fn open(path: &Path) -> Result<csv::Reader<std::fs::File>, CsvError> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })
}

/// Read voucher definitions from a csv file
pub fn read_vouchers(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Promotion, CsvError>>, CsvError> {
    let reader = open(path.as_ref())?;

    Ok(reader
        .into_deserialize::<VoucherRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;

            let users: HashSet<String> = row
                .assigned_users
                .as_deref()
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect();
            let per_user_quantity: HashMap<String, u32> = match row.per_user_quantity {
                Some(slots) if users.is_empty() => {
                    return Err(CsvError::InvalidField {
                        line,
                        field: "per_user_quantity",
                        value: format!("{slots} (no assigned_users)"),
                    });
                }
                Some(slots) => users.iter().map(|u| (u.clone(), slots)).collect(),
                None => HashMap::new(),
            };
            let visibility = if users.is_empty() {
                Visibility::Public
            } else {
                Visibility::Private(users)
            };

            Ok(Promotion {
                discount: parse_discount(line, &row.kind, row.value)?,
                applies_to: parse_applies_to(line, &row.applies_to)?,
                id: row.id,
                code: row.code,
                min_order_value: row.min_order.unwrap_or_default(),
                max_discount: row.max_discount.unwrap_or_default(),
                valid_from: row.valid_from,
                valid_until: row.valid_until,
                is_active: row.active,
                visibility,
                total_quantity: row.total_quantity,
                per_user_quantity,
            })
        }))
}

/// Read rank reward definitions from a csv file
pub fn read_rewards(
    path: impl AsRef<Path>,
    ranks: &RankTable,
) -> Result<impl Iterator<Item = Result<RankReward, CsvError>>, CsvError> {
    let reader = open(path.as_ref())?;
    let ranks = ranks.clone();

    Ok(reader
        .into_deserialize::<RewardRow>()
        .enumerate()
        .map(move |(idx, result)| {
            let line = idx + 2;
            let row = result.map_err(|source| CsvError::Parse { line, source })?;

            let rank_required = ranks
                .by_name(&row.rank)
                .cloned()
                .ok_or_else(|| CsvError::InvalidField {
                    line,
                    field: "rank",
                    value: row.rank.clone(),
                })?;

            let valid_for = Some(row.valid_days)
                .filter(|days| *days > 0)
                .and_then(TimeDelta::try_days)
                .ok_or_else(|| CsvError::InvalidField {
                    line,
                    field: "valid_days",
                    value: row.valid_days.to_string(),
                })?;

            Ok(RankReward {
                template: VoucherTemplate {
                    code_prefix: row.code_prefix,
                    discount: parse_discount(line, &row.kind, row.value)?,
                    max_discount: row.max_discount.unwrap_or_default(),
                    min_order_value: row.min_order.unwrap_or_default(),
                    applies_to: parse_applies_to(line, &row.applies_to)?,
                    valid_for,
                },
                id: row.id,
                title: row.title,
                description: row.description.unwrap_or_default(),
                rank_required,
            })
        }))
}

/// Read order events from a csv file
pub fn read_events(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Command, CsvError>>, CsvError> {
    let reader = open(path.as_ref())?;

    Ok(reader
        .into_deserialize::<EventRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2;
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            let kind = row.r#type.as_str();
            let missing = |field| CsvError::MissingField {
                line,
                kind: kind.to_string(),
                field,
            };

            match kind {
                "spend" => Ok(Command::RecordSpending {
                    total: row.amount.ok_or_else(|| missing("amount"))?,
                    user: row.user,
                }),
                "redeem" => {
                    let target = row.target.as_deref().ok_or_else(|| missing("target"))?;
                    Ok(Command::Redeem {
                        voucher: row.r#ref.clone().ok_or_else(|| missing("ref"))?,
                        cart_total: row.amount.ok_or_else(|| missing("amount"))?,
                        target: parse_target(line, target)?,
                        user: row.user,
                    })
                }
                "cancel" => {
                    let voucher = row.r#ref.clone().ok_or_else(|| missing("ref"))?;
                    // the target column says which order slot the voucher held
                    let target = parse_target(line, row.target.as_deref().unwrap_or("order"))?;
                    let (product_voucher, shipping_voucher) = match target {
                        Target::Shipping => (None, Some(voucher)),
                        _ => (Some(voucher), None),
                    };
                    Ok(Command::Cancel {
                        user: row.user,
                        product_voucher,
                        shipping_voucher,
                    })
                }
                "claim" => Ok(Command::Claim {
                    reward: row.r#ref.clone().ok_or_else(|| missing("ref"))?,
                    user: row.user,
                }),
                other => Err(CsvError::UnrecognizedType {
                    line,
                    kind: other.to_string(),
                }),
            }
        }))
}

/// Write ledger counters in csv format
pub fn write_ledger(
    rows: impl IntoIterator<Item = (SlotKey, LedgerEntry)>,
    out: impl io::Write,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(out);

    for (key, entry) in rows {
        writer.serialize(LedgerRow {
            voucher: &key.voucher,
            user: key.user.as_deref().unwrap_or_default(),
            consumed: entry.consumed,
        })?;
    }

    writer.flush()?;
    Ok(())
}

fn parse_discount(line: usize, kind: &str, value: i64) -> Result<Discount, CsvError> {
    let invalid = |field, value: String| CsvError::InvalidField { line, field, value };
    match kind {
        "percent" => u32::try_from(value)
            .map(Discount::Percent)
            .map_err(|_| invalid("value", value.to_string())),
        "fixed" => Ok(Discount::Fixed(Amount::from_minor(value))),
        other => Err(invalid("kind", other.to_string())),
    }
}

fn parse_applies_to(line: usize, raw: &str) -> Result<AppliesTo, CsvError> {
    match raw {
        "all" => Ok(AppliesTo::All),
        "shipping" => Ok(AppliesTo::ShippingFee),
        _ => match raw.strip_prefix("food:") {
            Some(food) if !food.is_empty() => Ok(AppliesTo::SpecificFood(food.to_string())),
            _ => Err(CsvError::InvalidField {
                line,
                field: "applies_to",
                value: raw.to_string(),
            }),
        },
    }
}

fn parse_target(line: usize, raw: &str) -> Result<Target, CsvError> {
    match raw {
        "order" => Ok(Target::Order),
        "shipping" => Ok(Target::Shipping),
        _ => match raw.strip_prefix("food:") {
            Some(food) if !food.is_empty() => Ok(Target::Food(food.to_string())),
            _ => Err(CsvError::InvalidField {
                line,
                field: "target",
                value: raw.to_string(),
            }),
        },
    }
}
