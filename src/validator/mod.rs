//! Pure request checks. Nothing here touches ledger state.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ProgramError;
use crate::state::{Predictions, StructuredPredictions};

pub const FINAL_GAMES: usize = 1;
pub const THIRD_PLACE_GAMES: usize = 1;
pub const SEMIFINAL_GAMES: usize = 2;
pub const QUARTER_FINAL_GAMES: usize = 4;
pub const ROUND_OF_16_GAMES: usize = 8;
pub const GROUP_STAGE_GAMES: usize = 16;

/// Expected entry count of every category, in [`StructuredPredictions::categories`] order.
pub const CATEGORY_GAMES: [usize; 8] = [
    FINAL_GAMES,
    THIRD_PLACE_GAMES,
    SEMIFINAL_GAMES,
    QUARTER_FINAL_GAMES,
    ROUND_OF_16_GAMES,
    GROUP_STAGE_GAMES,
    GROUP_STAGE_GAMES,
    GROUP_STAGE_GAMES,
];

pub const TOTAL_GAMES: usize = 64;
const _: () = {
    let mut sum = 0;
    let mut i = 0;
    while i < CATEGORY_GAMES.len() {
        sum += CATEGORY_GAMES[i];
        i += 1;
    }
    assert!(sum == TOTAL_GAMES);
};

pub const WORLD_CHAMPION_LEN: usize = 2;
/// Hex length of a SHA-256 commitment.
pub const DIGEST_LEN: usize = 64;

static GAME_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{2}-[A-Z]{2}=\d{1,2}:\d{1,2}$").expect("static regex"));
static TEAM_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{2}$").expect("static regex"));

/// Split a category into its non-empty entries.
fn entries(field: &str) -> Vec<&str> {
    field.split(';').filter(|entry| !entry.is_empty()).collect()
}

pub fn validate_predictions(predictions: &Predictions) -> Result<(), ProgramError> {
    match predictions {
        Predictions::Structured(structured) => validate_structured(structured),
        Predictions::Committed { digest } => validate_digest(digest),
    }
}

pub fn validate_structured(predictions: &StructuredPredictions) -> Result<(), ProgramError> {
    if predictions.world_champion.len() != WORLD_CHAMPION_LEN {
        return Err(ProgramError::InvalidPayloadLength {
            field: "worldChampion",
            expected: WORLD_CHAMPION_LEN,
            actual: predictions.world_champion.len(),
        });
    }

    // Shape first: any short category is a length failure even when another
    // category is also malformed.
    let categories = predictions.categories();
    let mut parsed = Vec::with_capacity(categories.len());
    for ((field, value), expected) in categories.into_iter().zip(CATEGORY_GAMES) {
        let games = entries(value);
        if games.len() != expected {
            return Err(ProgramError::InvalidPayloadLength {
                field,
                expected,
                actual: games.len(),
            });
        }
        parsed.push((field, games));
    }

    if !TEAM_CODE.is_match(&predictions.world_champion) {
        return Err(ProgramError::InvalidPayloadData {
            field: "worldChampion",
        });
    }
    for (field, games) in parsed {
        if games.iter().any(|game| !GAME_ENTRY.is_match(game)) {
            return Err(ProgramError::InvalidPayloadData { field });
        }
    }
    Ok(())
}

pub fn validate_digest(digest: &str) -> Result<(), ProgramError> {
    if digest.len() != DIGEST_LEN {
        return Err(ProgramError::InvalidPayloadLength {
            field: "digest",
            expected: DIGEST_LEN,
            actual: digest.len(),
        });
    }
    // lowercase hex only
    if digest.bytes().any(|b| b.is_ascii_uppercase()) || hex::decode(digest).is_err() {
        return Err(ProgramError::InvalidPayloadData { field: "digest" });
    }
    Ok(())
}

pub fn validate_round_id(round_id: i64) -> Result<i64, ProgramError> {
    if round_id <= 0 {
        return Err(ProgramError::InvalidRoundId(round_id));
    }
    Ok(round_id)
}

pub fn validate_deadline(deadline: Option<i64>, now: i64) -> Result<(), ProgramError> {
    match deadline {
        Some(deadline) if now > deadline => Err(ProgramError::SubmissionClosed),
        _ => Ok(()),
    }
}

pub fn validate_submissions_per_wallet(submitted: u32, limit: u32) -> Result<(), ProgramError> {
    if submitted >= limit {
        return Err(ProgramError::SubmissionLimitExceeded { limit });
    }
    Ok(())
}

/// A well-formed 64-game prediction, used by tests and the CLI template.
pub fn sample_predictions() -> StructuredPredictions {
    let games = |n: usize| vec!["NL-PL=1:0"; n].join(";");
    StructuredPredictions {
        world_champion: "NL".into(),
        final_game: games(FINAL_GAMES),
        third_place_game: "ES-CZ=0:0".into(),
        semifinals: games(SEMIFINAL_GAMES),
        quarter_finals: games(QUARTER_FINAL_GAMES),
        round_of_16: games(ROUND_OF_16_GAMES),
        group_stage_1: games(GROUP_STAGE_GAMES),
        group_stage_2: games(GROUP_STAGE_GAMES),
        group_stage_3: games(GROUP_STAGE_GAMES),
    }
}
