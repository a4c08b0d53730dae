// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use kiosk_ledger_rs::{
    DispenseCoordinator, DispenseRegistry, DispenseStatus, KioskConfig, LedgerStore, RequestId,
    UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// Kiosk Replay - Reconcile a day's dispense events offline
///
/// Reads kiosk events from a CSV file, replays them through the dispense
/// coordinator, and outputs final wallet states to stdout.
#[derive(Parser, Debug)]
#[command(name = "kiosk-ledger-rs")]
#[command(about = "Replays kiosk dispense-event CSVs into wallet states", long_about = None)]
struct Args {
    /// Path to CSV file with kiosk events
    ///
    /// Expected format: op,user,amount,outcome
    /// Example: cargo run -- events.csv > wallets.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

fn main() {
    // Parse command line arguments
    let args = Args::parse();

    let config = match KioskConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    // Open input file
    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    // Replay events from CSV
    let replay = match process_events(BufReader::new(file), &config) {
        Ok(replay) => replay,
        Err(e) => {
            eprintln!("Error processing events: {}", e);
            process::exit(1);
        }
    };

    // Write results to stdout
    if let Err(e) = write_wallets(&replay, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, user, amount, outcome`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    user: String,
    /// Wallet units for `credit`, milliliters for `dispense`.
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<u32>,
    /// Hardware-reported outcome for `dispense`; empty leaves it pending.
    outcome: Option<String>,
}

#[derive(Debug)]
enum Event {
    Credit {
        user: String,
        amount: i64,
    },
    Dispense {
        user: String,
        quantity_ml: u32,
        outcome: Option<String>,
    },
}

impl CsvRecord {
    /// Converts a CSV record to a kiosk event.
    ///
    /// Returns `None` for unknown ops or missing required fields.
    fn into_event(self) -> Option<Event> {
        match self.op.to_lowercase().as_str() {
            "credit" => {
                let amount = self.amount.filter(|a| *a > 0)?;
                Some(Event::Credit {
                    user: self.user,
                    amount: i64::from(amount),
                })
            }
            "dispense" => {
                let quantity_ml = self.amount?;
                Some(Event::Dispense {
                    user: self.user,
                    quantity_ml,
                    outcome: self.outcome.filter(|o| !o.is_empty()),
                })
            }
            _ => None,
        }
    }
}

/// Replay state: the stores plus label bookkeeping for output.
struct Replay {
    ledger: Arc<LedgerStore>,
    registry: Arc<DispenseRegistry>,
    coordinator: DispenseCoordinator,
    /// User labels from the CSV mapped to generated ids, output-ordered.
    users: BTreeMap<String, UserId>,
    /// Requests created per label, for the pending-count column.
    requests: BTreeMap<String, Vec<RequestId>>,
}

impl Replay {
    fn new(config: &KioskConfig) -> Self {
        let ledger = Arc::new(LedgerStore::with_lock_timeout(config.store_timeout));
        let registry = Arc::new(DispenseRegistry::new());
        let coordinator = DispenseCoordinator::with_retry(
            config.pricing(),
            Arc::clone(&ledger),
            Arc::clone(&registry),
            config.retry,
        );
        Self {
            ledger,
            registry,
            coordinator,
            users: BTreeMap::new(),
            requests: BTreeMap::new(),
        }
    }

    fn user_id(&mut self, label: &str) -> UserId {
        *self
            .users
            .entry(label.to_string())
            .or_insert_with(UserId::new)
    }

    fn apply(&mut self, event: Event) -> Result<(), kiosk_ledger_rs::DispenseError> {
        match event {
            Event::Credit { user, amount } => {
                let user_id = self.user_id(&user);
                self.ledger.ensure_wallet(user_id)?;
                self.ledger.credit(&user_id, amount, "Replay credit")?;
            }
            Event::Dispense {
                user,
                quantity_ml,
                outcome,
            } => {
                let user_id = self.user_id(&user);
                let ticket = self.coordinator.start_dispense(user_id, quantity_ml)?;
                self.requests
                    .entry(user)
                    .or_default()
                    .push(ticket.request_id);
                if let Some(outcome) = outcome {
                    self.coordinator
                        .complete_dispense(user_id, ticket.request_id, &outcome)?;
                }
            }
        }
        Ok(())
    }

    fn pending_count(&self, label: &str) -> usize {
        self.requests
            .get(label)
            .map(|ids| {
                ids.iter()
                    .filter(|id| {
                        self.registry
                            .get(id)
                            .is_ok_and(|r| r.status() == DispenseStatus::Pending)
                    })
                    .count()
            })
            .unwrap_or(0)
    }
}

/// Final wallet state row.
#[derive(Debug, Serialize)]
struct WalletRow<'a> {
    user: &'a str,
    balance: i64,
    pending_requests: usize,
}

/// Replays kiosk events from a CSV reader.
///
/// Malformed rows and rejected events (unknown quantity, insufficient
/// funds) are skipped without stopping the replay, mirroring how a kiosk
/// keeps serving after one declined dispense.
///
/// # CSV Format
///
/// Expected columns: `op, user, amount, outcome`
/// - `op`: Event type (credit, dispense)
/// - `user`: Free-form user label
/// - `amount`: Wallet units for credit, milliliters for dispense
/// - `outcome`: COMPLETED or FAILED for dispense; empty leaves it pending
///
/// # Example
///
/// ```csv
/// op,user,amount,outcome
/// credit,john,100,
/// dispense,john,500,COMPLETED
/// dispense,john,500,FAILED
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
fn process_events<R: Read>(reader: R, config: &KioskConfig) -> Result<Replay, csv::Error> {
    let mut replay = Replay::new(config);

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true) // Allow missing outcome field
        .has_headers(true)
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        match result {
            Ok(record) => {
                let Some(event) = record.into_event() else {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping invalid event record");
                    continue;
                };

                if let Err(e) = replay.apply(event) {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping event: {}", e);
                }
            }
            Err(e) => {
                // Skip malformed rows
                #[cfg(debug_assertions)]
                eprintln!("Skipping malformed row: {}", e);
                continue;
            }
        }
    }

    Ok(replay)
}

/// Writes final wallet states to a CSV writer.
///
/// Columns: `user, balance, pending_requests`, ordered by user label.
///
/// # Errors
///
/// Returns a CSV error if writing fails.
fn write_wallets<W: Write>(replay: &Replay, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for (label, user_id) in &replay.users {
        let balance = replay.ledger.balance(user_id).unwrap_or(0);
        wtr.serialize(WalletRow {
            user: label,
            balance,
            pending_requests: replay.pending_count(label),
        })?;
    }

    wtr.flush()?;
    Ok(())
}
