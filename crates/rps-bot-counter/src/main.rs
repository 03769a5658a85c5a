//! Counter bot - plays whatever beats the opponent's favourite play.
//!
//! Reads one JSON record from stdin and prints its play as the last line
//! of stdout. Works as a template for `command` bots: anything printed
//! before the last line shows up in test runs but is otherwise ignored.

use anyhow::Context;
use rand::seq::SliceRandom;
use rps_arena::play::Play;
use rps_arena::sandbox::BotRunInput;
use std::io::{self, BufRead};

/// Picks the play that beats the opponent's most frequent valid play.
///
/// Ties go to the most recent of the tied plays. Returns `None` when the
/// opponent has not made a valid play yet.
fn counter(history: &[Play]) -> Option<Play> {
    let mut counts = [0usize; 3];
    let mut last_seen = [0usize; 3];
    for (i, play) in history.iter().enumerate() {
        if let Some(slot) = Play::VALID.iter().position(|p| p == play) {
            counts[slot] += 1;
            last_seen[slot] = i + 1;
        }
    }

    (0..3)
        .filter(|&slot| counts[slot] > 0)
        .max_by_key(|&slot| (counts[slot], last_seen[slot]))
        .and_then(|slot| Play::VALID[slot].beaten_by())
}

fn main() -> anyhow::Result<()> {
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read stdin")?;
    let input: BotRunInput =
        serde_json::from_str(line.trim()).context("Failed to parse input record")?;

    println!(
        "round {} against {}, seen {} plays",
        input.round,
        input.opponent,
        input.history.len()
    );

    let play = match counter(&input.history) {
        Some(play) => play,
        None => *Play::VALID
            .choose(&mut rand::thread_rng())
            .context("No plays to choose from")?,
    };
    println!("{}", play.token());
    Ok(())
}
