use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::Serialize;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RouletteError {
    #[error("malformed history entry (expected 2 or 3 comma-separated identifiers): {0}")]
    MalformedHistoryEntry(String),
    #[error("no feasible matching for {participants} participants within the allowed history window")]
    NoFeasibleMatching { participants: usize },
}

/// A normalized participant name: trimmed and lowercased, so that the same
/// person spelled differently across the pool and the history log compares
/// equal.
#[derive(Debug, Clone, Serialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    #[must_use]
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An unordered dyad of two distinct participants, stored canonically with
/// `left < right` so that constructing from (A, B) or (B, A) yields equal,
/// equal-hashing values. Pairs populate ordered sets throughout the matching
/// engine, which is what makes every traversal deterministic.
#[derive(Debug, Clone, Serialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pair {
    left: Identifier,
    right: Identifier,
}

impl Pair {
    /// Returns `None` when both members are the same participant.
    #[must_use]
    pub fn new(a: Identifier, b: Identifier) -> Option<Self> {
        match a.cmp(&b) {
            Ordering::Less => Some(Self { left: a, right: b }),
            Ordering::Greater => Some(Self { left: b, right: a }),
            Ordering::Equal => None,
        }
    }

    #[must_use]
    pub fn left(&self) -> &Identifier {
        &self.left
    }

    #[must_use]
    pub fn right(&self) -> &Identifier {
        &self.right
    }

    #[must_use]
    pub fn contains(&self, id: &Identifier) -> bool {
        self.left == *id || self.right == *id
    }

    /// The other member, or `None` when `id` is not part of this pair.
    #[must_use]
    pub fn partner(&self, id: &Identifier) -> Option<&Identifier> {
        if self.left == *id {
            Some(&self.right)
        } else if self.right == *id {
            Some(&self.left)
        } else {
            None
        }
    }

    fn overlaps(&self, other: &Self) -> bool {
        other.contains(&self.left) || other.contains(&self.right)
    }
}

impl Display for Pair {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", self.left, self.right)
    }
}

/// A 3-way group in recorded order. In a round result the deferred (leftover)
/// participant is listed first by convention.
#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct Triple {
    members: [Identifier; 3],
}

impl Triple {
    /// Returns `None` when any two members are the same participant.
    #[must_use]
    pub fn new(first: Identifier, second: Identifier, third: Identifier) -> Option<Self> {
        if first == second || first == third || second == third {
            return None;
        }
        Some(Self { members: [first, second, third] })
    }

    #[must_use]
    pub fn members(&self) -> &[Identifier; 3] {
        &self.members
    }

    /// The complete graph over the members: (a,b), (a,c), (b,c).
    #[must_use]
    pub fn pairs(&self) -> Vec<Pair> {
        let [a, b, c] = &self.members;
        [(a, b), (a, c), (b, c)]
            .into_iter()
            .filter_map(|(x, y)| Pair::new(x.clone(), y.clone()))
            .collect()
    }
}

impl Display for Triple {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}, {}", self.members[0], self.members[1], self.members[2])
    }
}

/// One entry of the chronological match log: a 2-way or 3-way group.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum HistoryEntry {
    Pair(Pair),
    Triple(Triple),
}

impl HistoryEntry {
    /// Parse one non-blank log line of comma-separated identifiers.
    ///
    /// # Errors
    /// Returns [`RouletteError::MalformedHistoryEntry`] carrying the raw line
    /// when it has fewer than 2 or more than 3 fields, an empty field, or a
    /// repeated participant.
    pub fn parse(line: &str) -> Result<Self, RouletteError> {
        let malformed = || RouletteError::MalformedHistoryEntry(line.to_string());
        let fields: Vec<Identifier> = line.split(',').map(Identifier::new).collect();
        if fields.iter().any(Identifier::is_empty) {
            return Err(malformed());
        }
        match fields.as_slice() {
            [a, b] => Pair::new(a.clone(), b.clone()).map(Self::Pair).ok_or_else(malformed),
            [a, b, c] => Triple::new(a.clone(), b.clone(), c.clone())
                .map(Self::Triple)
                .ok_or_else(malformed),
            _ => Err(malformed()),
        }
    }
}

/// The chronological match log, oldest entry first.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_entries(entries: Vec<HistoryEntry>) -> Self {
        Self { entries }
    }

    /// Parse log lines, oldest first. Blank lines are cosmetic separators.
    ///
    /// # Errors
    /// Returns [`RouletteError::MalformedHistoryEntry`] for the first line
    /// that is not a valid 2- or 3-way group.
    pub fn parse<'a, I>(lines: I) -> Result<Self, RouletteError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut entries = Vec::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(HistoryEntry::parse(line)?);
        }
        Ok(Self { entries })
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    #[must_use]
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The exploded pair sequence, oldest first. A triple (a,b,c) contributes
    /// (a,b), (a,c), (b,c) at its chronological position.
    #[must_use]
    pub fn pairs(&self) -> Vec<Pair> {
        let mut exploded = Vec::new();
        for entry in &self.entries {
            match entry {
                HistoryEntry::Pair(pair) => exploded.push(pair.clone()),
                HistoryEntry::Triple(triple) => exploded.extend(triple.pairs()),
            }
        }
        exploded
    }

    fn triple_pairs(&self) -> Vec<Pair> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                HistoryEntry::Triple(triple) => Some(triple.pairs()),
                HistoryEntry::Pair(_) => None,
            })
            .flatten()
            .collect()
    }
}

/// How much history counts as "too recent to repeat". The formula is a
/// heuristic, not a proof-backed bound: a round needs `n/2` meetings plus a
/// margin for the extra pairs a 3-way group produces, and after `n - 1`
/// rounds every pair could in principle recur (round-robin argument). The
/// margins are tunable; the defaults are what the tool has always used.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct WindowPolicy {
    pub meeting_margin: usize,
    pub round_margin: usize,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self { meeting_margin: 2, round_margin: 2 }
    }
}

impl WindowPolicy {
    #[must_use]
    pub fn meetings_per_round(self, participants: usize) -> usize {
        participants / 2 + self.meeting_margin
    }

    #[must_use]
    pub fn window_length(self, participants: usize) -> usize {
        (self.meetings_per_round(participants) + self.round_margin)
            * participants.saturating_sub(1)
    }

    /// Index into the exploded pair sequence where the relevant window starts.
    #[must_use]
    pub fn cutoff(self, participants: usize, history_pairs: usize) -> usize {
        history_pairs.saturating_sub(self.window_length(participants))
    }
}

/// Pick the participant to defer into a 3-way group when the pool is odd:
/// the one who least recently took part in a triple. Everybody starts as a
/// candidate; scanning the triple-only history newest first, each encountered
/// participant is struck from the candidate set until one remains or history
/// runs out. Remaining ties break to the lexicographically smallest.
#[must_use]
pub fn select_leftover(
    participants: &BTreeSet<Identifier>,
    history: &History,
) -> Option<Identifier> {
    let mut candidates = participants.clone();
    let linearized: Vec<Identifier> = history
        .triple_pairs()
        .into_iter()
        .flat_map(|pair| [pair.left().clone(), pair.right().clone()])
        .collect();
    for id in linearized.iter().rev() {
        if candidates.len() == 1 {
            break;
        }
        candidates.remove(id);
    }
    candidates.into_iter().next()
}

/// All 2-combinations over the participant set.
#[must_use]
pub fn potential_pairs(participants: &BTreeSet<Identifier>) -> BTreeSet<Pair> {
    let members: Vec<&Identifier> = participants.iter().collect();
    let mut universe = BTreeSet::new();
    for (index, a) in members.iter().enumerate() {
        for b in &members[index + 1..] {
            if let Some(pair) = Pair::new((*a).clone(), (*b).clone()) {
                universe.insert(pair);
            }
        }
    }
    universe
}

/// Find a perfect matching over an even-sized participant set, avoiding the
/// pairs in the recent history window. When no matching avoids the whole
/// window, the oldest `meetings_per_round` window entries are dropped and the
/// search retried: freshness of avoidance is traded for feasibility until the
/// window is too small to shrink further.
///
/// # Errors
/// Returns [`RouletteError::NoFeasibleMatching`] once the window has shrunk
/// to `meetings_per_round + 1` entries or fewer without a matching being
/// found.
pub fn find_matching(
    participants: &BTreeSet<Identifier>,
    history: &History,
    policy: WindowPolicy,
) -> Result<BTreeSet<Pair>, RouletteError> {
    if participants.is_empty() {
        return Ok(BTreeSet::new());
    }
    debug_assert!(participants.len() % 2 == 0, "participant set must be even");

    let universe = potential_pairs(participants);
    let meetings_per_round = policy.meetings_per_round(participants.len());
    let exploded = history.pairs();
    let cutoff = policy.cutoff(participants.len(), exploded.len());
    let mut window = &exploded[cutoff..];

    loop {
        let excluded: BTreeSet<&Pair> = window.iter().collect();
        let candidates: BTreeSet<Pair> =
            universe.iter().filter(|pair| !excluded.contains(pair)).cloned().collect();
        // A participant stripped of every candidate pair can never be covered,
        // so the attempt is hopeless before the search even starts.
        if spanned_participants(&candidates).len() == participants.len() {
            if let Some(found) = perfect_matching(&candidates, &BTreeSet::new()) {
                return Ok(found);
            }
        }
        if window.len() <= meetings_per_round + 1 {
            return Err(RouletteError::NoFeasibleMatching { participants: participants.len() });
        }
        window = &window[meetings_per_round..];
    }
}

/// Backtracking exact-cover search: pick a pair, drop everything sharing a
/// member with it, recurse; undo on failure and try the next pair. Candidates
/// are visited in canonical order, so the result is reproducible.
fn perfect_matching(available: &BTreeSet<Pair>, chosen: &BTreeSet<Pair>) -> Option<BTreeSet<Pair>> {
    if available.is_empty() {
        return Some(chosen.clone());
    }
    let spanned_before = spanned_participants(available).len();
    for pair in available {
        let remaining: BTreeSet<Pair> = available
            .iter()
            .filter(|candidate| *candidate != pair && !candidate.overlaps(pair))
            .cloned()
            .collect();
        // Removing the pair and its conflicts must take exactly its two
        // members out of coverage; losing a third participant means somebody
        // was stranded without a remaining candidate pair.
        if spanned_before - spanned_participants(&remaining).len() != 2 {
            continue;
        }
        let mut next_chosen = chosen.clone();
        next_chosen.insert(pair.clone());
        if let Some(found) = perfect_matching(&remaining, &next_chosen) {
            return Some(found);
        }
    }
    None
}

fn spanned_participants(pairs: &BTreeSet<Pair>) -> BTreeSet<&Identifier> {
    let mut ids = BTreeSet::new();
    for pair in pairs {
        ids.insert(pair.left());
        ids.insert(pair.right());
    }
    ids
}

/// Choose which matched pair the leftover participant joins: scanning the
/// full exploded history newest first, every pair containing one of the
/// leftover's past partners is struck from the candidates until one remains
/// or history runs out. Matched pairs are disjoint, so each step strikes at
/// most one candidate and the survivor is never eliminated. Remaining ties
/// break to the lexicographically smallest pair.
#[must_use]
pub fn promote_leftover(
    leftover: &Identifier,
    matches: &BTreeSet<Pair>,
    history: &History,
) -> Option<Pair> {
    let mut candidates = matches.clone();
    let exploded = history.pairs();
    for past in exploded.iter().rev() {
        if candidates.len() <= 1 {
            break;
        }
        if let Some(partner) = past.partner(leftover) {
            let partner = partner.clone();
            candidates.retain(|candidate| !candidate.contains(&partner));
        }
    }
    candidates.into_iter().next()
}

/// One group of the round result.
#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(tag = "kind", content = "group", rename_all = "snake_case")]
pub enum Grouping {
    Pair(Pair),
    Triple(Triple),
}

impl Grouping {
    #[must_use]
    pub fn members(&self) -> Vec<&Identifier> {
        match self {
            Self::Pair(pair) => vec![pair.left(), pair.right()],
            Self::Triple(triple) => triple.members().iter().collect(),
        }
    }
}

impl Display for Grouping {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pair(pair) => pair.fmt(f),
            Self::Triple(triple) => triple.fmt(f),
        }
    }
}

/// The finished round: the 3-way group first (when the pool was odd), then
/// the matched pairs in canonical order.
#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct RoundPlan {
    participants: usize,
    leftover: Option<Identifier>,
    groupings: Vec<Grouping>,
}

impl RoundPlan {
    #[must_use]
    pub fn participants(&self) -> usize {
        self.participants
    }

    #[must_use]
    pub fn leftover(&self) -> Option<&Identifier> {
        self.leftover.as_ref()
    }

    #[must_use]
    pub fn groupings(&self) -> &[Grouping] {
        &self.groupings
    }

    /// The round in history-log line format, one group per line.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.groupings.iter().map(ToString::to_string).collect()
    }

    /// The round as log entries, so the caller can append it and the next
    /// run's window includes it.
    #[must_use]
    pub fn to_history_entries(&self) -> Vec<HistoryEntry> {
        self.groupings
            .iter()
            .map(|grouping| match grouping {
                Grouping::Pair(pair) => HistoryEntry::Pair(pair.clone()),
                Grouping::Triple(triple) => HistoryEntry::Triple(triple.clone()),
            })
            .collect()
    }
}

impl Display for RoundPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (index, grouping) in self.groupings.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{grouping}")?;
        }
        Ok(())
    }
}

/// Compute a full round for the given pool against the match history.
///
/// The pool is deduplicated; an odd pool defers one participant
/// ([`select_leftover`]) and folds them back into the best matched pair
/// afterwards ([`promote_leftover`]). An empty pool yields an empty plan.
///
/// # Errors
/// Returns [`RouletteError::NoFeasibleMatching`] for a single-participant
/// pool, or when the windowed retry exhausts all allowed shrinkage.
pub fn plan_round(
    pool: &[Identifier],
    history: &History,
    policy: WindowPolicy,
) -> Result<RoundPlan, RouletteError> {
    let mut participants: BTreeSet<Identifier> =
        pool.iter().filter(|id| !id.is_empty()).cloned().collect();
    let total = participants.len();
    if total == 0 {
        return Ok(RoundPlan { participants: 0, leftover: None, groupings: Vec::new() });
    }
    if total == 1 {
        return Err(RouletteError::NoFeasibleMatching { participants: 1 });
    }

    let mut leftover = None;
    if total % 2 != 0 {
        if let Some(deferred) = select_leftover(&participants, history) {
            participants.remove(&deferred);
            leftover = Some(deferred);
        }
    }

    let mut matched = find_matching(&participants, history, policy)?;

    let mut groupings = Vec::new();
    if let Some(deferred) = &leftover {
        let Some(host) = promote_leftover(deferred, &matched, history) else {
            return Err(RouletteError::NoFeasibleMatching { participants: total });
        };
        matched.remove(&host);
        let Some(triple) =
            Triple::new(deferred.clone(), host.left().clone(), host.right().clone())
        else {
            return Err(RouletteError::NoFeasibleMatching { participants: total });
        };
        groupings.push(Grouping::Triple(triple));
    }
    groupings.extend(matched.into_iter().map(Grouping::Pair));

    Ok(RoundPlan { participants: total, leftover, groupings })
}
