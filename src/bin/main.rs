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

use chrono::{Duration, Utc};
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use rand::SeedableRng;
use rand::rngs::StdRng;
use red_envelope_rs::{
    CreateRequest, Engine, EngineConfig, EnvelopeCode, EnvelopeError, EnvelopeKind, ManualClock,
    MemoryStore, PayKeyRegistry, RequestContext, UserId,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Red Envelope Replay - Run an envelope script against an in-memory engine
///
/// Reads operations from a CSV file and writes the final account balances to
/// stdout. Supports opening accounts, creating and claiming envelopes,
/// advancing the clock and sweeping expired envelopes.
#[derive(Parser, Debug)]
#[command(name = "red-envelope-rs")]
#[command(about = "Replays red envelope scripts", long_about = None)]
struct Args {
    /// Path to CSV script
    ///
    /// Expected format: op,user,ref,kind,amount,count,text
    /// Example: cargo run -- script.csv > accounts.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Also write the final envelope states as CSV to this file
    #[arg(long, value_name = "FILE")]
    envelopes: Option<PathBuf>,

    /// Engine settings (TOML)
    #[arg(long, value_name = "FILE", env = "ENVELOPE_CONFIG")]
    config: Option<PathBuf>,

    /// Seed for random shares
    #[arg(long)]
    seed: Option<u64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match EngineConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let replay = match run_script(BufReader::new(file), config, args.seed) {
        Ok(replay) => replay,
        Err(e) => {
            eprintln!("Error processing script: {}", e);
            process::exit(1);
        }
    };

    if let Some(path) = &args.envelopes {
        let result = File::create(path)
            .map_err(csv::Error::from)
            .and_then(|file| write_envelopes(&replay.engine, file));
        if let Err(e) = result {
            eprintln!("Error writing '{}': {}", path.display(), e);
            process::exit(1);
        }
    }

    if let Err(e) = write_accounts(&replay.engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Payment key every replayed account is given.
const REPLAY_PAY_KEY: &str = "replay";

/// Raw CSV record matching the script format.
///
/// Fields: `op, user, ref, kind, amount, count, text`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    user: Option<u64>,
    #[serde(rename = "ref")]
    label: Option<String>,
    kind: Option<String>,
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
    #[serde(deserialize_with = "csv::invalid_option")]
    count: Option<u32>,
    text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    Open {
        user: UserId,
        username: String,
        balance: Decimal,
    },
    Create {
        user: UserId,
        label: String,
        kind: EnvelopeKind,
        amount: Decimal,
        count: u32,
        greeting: String,
    },
    Claim {
        user: UserId,
        label: String,
    },
    Advance {
        hours: u32,
    },
    Sweep,
}

impl CsvRecord {
    /// Returns `None` for unknown ops or missing required fields.
    fn into_op(self) -> Option<Op> {
        let user = self.user.map(UserId);
        match self.op.to_lowercase().as_str() {
            "open" => Some(Op::Open {
                user: user?,
                username: self.text.unwrap_or_default(),
                balance: self.amount?,
            }),
            "create" => {
                let kind = match self.kind?.to_lowercase().as_str() {
                    "fixed" => EnvelopeKind::Fixed,
                    "random" => EnvelopeKind::Random,
                    _ => return None,
                };
                Some(Op::Create {
                    user: user?,
                    label: self.label?,
                    kind,
                    amount: self.amount?,
                    count: self.count?,
                    greeting: self.text.unwrap_or_default(),
                })
            }
            "claim" => Some(Op::Claim {
                user: user?,
                label: self.label?,
            }),
            "advance" => Some(Op::Advance { hours: self.count? }),
            "sweep" => Some(Op::Sweep),
            _ => None,
        }
    }
}

/// Why a script operation was rejected.
#[derive(Debug, thiserror::Error)]
enum ReplayError {
    #[error(transparent)]
    Engine(#[from] EnvelopeError),
    #[error("clock cannot advance {0} hours")]
    ClockOverflow(u32),
}

impl ReplayError {
    fn code(&self) -> &'static str {
        match self {
            Self::Engine(err) => err.code(),
            Self::ClockOverflow(_) => "clock_overflow",
        }
    }
}

/// Engine under replay plus the script's envelope labels.
pub struct Replay {
    engine: Engine,
    clock: Arc<ManualClock>,
    keys: Arc<PayKeyRegistry>,
    labels: HashMap<String, EnvelopeCode>,
    rng: StdRng,
}

impl Replay {
    fn new(config: EngineConfig, seed: Option<u64>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let keys = Arc::new(PayKeyRegistry::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = Engine::new(config, store, keys.clone(), clock.clone());
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Replay {
            engine,
            clock,
            keys,
            labels: HashMap::new(),
            rng,
        }
    }

    fn apply(&mut self, op: Op) -> Result<(), ReplayError> {
        match op {
            Op::Open {
                user,
                username,
                balance,
            } => {
                self.engine.store().open_account(user, username, balance)?;
                self.keys.set_key(user, REPLAY_PAY_KEY);
            }
            Op::Create {
                user,
                label,
                kind,
                amount,
                count,
                greeting,
            } => {
                let created = self.engine.create(
                    &RequestContext::new(user),
                    CreateRequest {
                        kind,
                        total_amount: amount,
                        total_count: count,
                        greeting,
                        pay_key: REPLAY_PAY_KEY.to_owned(),
                    },
                )?;
                info!(label = %label, link = %created.link, "envelope created");
                self.labels.insert(label, created.code);
            }
            Op::Claim { user, label } => {
                let code = self.labels.get(&label).ok_or(EnvelopeError::NotFound)?;
                let claimed =
                    self.engine
                        .claim_with_rng(&RequestContext::new(user), code, &mut self.rng)?;
                info!(label = %label, user = %user, amount = %claimed.amount, "envelope claimed");
            }
            Op::Advance { hours } => {
                let now = self
                    .clock
                    .advance(Duration::hours(i64::from(hours)))
                    .ok_or(ReplayError::ClockOverflow(hours))?;
                info!(hours, now = %now, "clock advanced");
            }
            Op::Sweep => {
                self.engine.sweep_expired();
            }
        }
        Ok(())
    }
}

/// Runs a script from a CSV reader.
///
/// Rows are streamed one at a time. Malformed rows and operations the engine
/// rejects are logged and skipped.
///
/// # CSV Format
///
/// Expected columns: `op, user, ref, kind, amount, count, text`
/// - `open`: account `user` with balance `amount` and username `text`
/// - `create`: envelope labelled `ref` of `kind`, `amount` and `count`, greeting `text`
/// - `claim`: `user` claims from the envelope labelled `ref`
/// - `advance`: clock moves forward `count` hours
/// - `sweep`: refund expired envelopes
///
/// # Example
///
/// ```csv
/// op,user,ref,kind,amount,count,text
/// open,1,,,100.00,,alice
/// create,1,party,fixed,10.00,3,Cheers
/// claim,2,party,,,,
/// advance,,,,,25,
/// sweep,,,,,,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails.
pub fn run_script<R: Read>(
    reader: R,
    config: EngineConfig,
    seed: Option<u64>,
) -> Result<Replay, csv::Error> {
    let mut replay = Replay::new(config, seed);

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(line = line + 2, error = %e, "skipping malformed row");
                continue;
            }
        };
        let Some(op) = record.into_op() else {
            warn!(line = line + 2, "skipping invalid operation");
            continue;
        };
        if let Err(e) = replay.apply(op) {
            warn!(line = line + 2, code = e.code(), error = %e, "operation rejected");
        }
    }

    Ok(replay)
}

/// Writes account balances to a CSV writer, ordered by user.
///
/// # CSV Format
///
/// Columns: `user, username, balance`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_accounts<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for account in engine.store().accounts() {
        wtr.serialize(&account)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes every envelope's current state to a CSV writer, ordered by id.
pub fn write_envelopes<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for envelope in engine.store().envelopes_where(|_| true) {
        wtr.serialize(&envelope)?;
    }
    wtr.flush()?;
    Ok(())
}
