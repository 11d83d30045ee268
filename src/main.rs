use std::env;
use std::io;
use std::process::ExitCode;

use promo_eng::PromoEngine;
use promo_eng::config::Config;
use promo_eng::csv::{read_events, read_rewards, read_vouchers, write_ledger};
use promo_eng::rank::RankTable;
use tokio_stream::wrappers::ReceiverStream;
use tracing::level_filters::LevelFilter;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: promo-eng <vouchers.csv> <events.csv> [rewards.csv]";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::WARN.into()))
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (vouchers_path, events_path, rewards_path) = match args.as_slice() {
        [vouchers, events] => (vouchers, events, None),
        [vouchers, events, rewards] => (vouchers, events, Some(rewards)),
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    let config = Config::from_env();
    let ranks = RankTable::default();
    let engine = PromoEngine::new(ranks.clone(), config.retry);

    let vouchers = match read_vouchers(vouchers_path) {
        Ok(rows) => rows,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    for result in vouchers {
        match result.map(|promo| engine.catalog().create(promo)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("{e}"),
            Err(e) => warn!("{e}"),
        }
    }

    if let Some(path) = rewards_path {
        let rewards = match read_rewards(path, &ranks) {
            Ok(rows) => rows,
            Err(e) => {
                error!("{e}");
                return ExitCode::FAILURE;
            }
        };
        for result in rewards {
            match result.map(|reward| engine.catalog().add_reward(reward)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("{e}"),
                Err(e) => warn!("{e}"),
            }
        }
    }

    let events = match read_events(events_path.clone()) {
        Ok(rows) => rows,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let (event_sender, event_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in events {
            match result {
                Ok(event) => {
                    if event_sender.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    engine.run(ReceiverStream::new(event_receiver)).await;

    if let Err(e) = write_ledger(engine.ledger().snapshot(), io::stdout().lock()) {
        error!("failed to write ledger: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
