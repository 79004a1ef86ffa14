//! 抽签算法：带排除约束的随机错排（derangement）。
//!
//! 每次尝试用 Fisher–Yates 洗牌生成一个均匀随机排列，原顺序第 i 位赠送给洗牌后第 i 位，
//! 出现自己送自己或命中排除对就整轮丢弃重来。尝试次数有上限，超过上限返回
//! `NoFeasibleAssignment`，由调用方提示用户放宽排除条件。

use std::collections::{HashMap, HashSet};

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::{CryptoRng, Rng};
use thiserror::Error;
use uuid::Uuid;

pub const MAX_ATTEMPTS: usize = 10_000;
pub const MIN_PARTICIPANTS: usize = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatchError {
    #[error("need at least {MIN_PARTICIPANTS} participants, got {0}")]
    NotEnoughParticipants(usize),
    #[error("participant {0} appears more than once")]
    DuplicateParticipant(Uuid),
    #[error("exclusion references unknown participant {0}")]
    UnknownParticipant(Uuid),
    #[error("no valid assignment found after {attempts} attempts")]
    NoFeasibleAssignment { attempts: usize },
}

/// 对称的禁止赠送关系。插入 {a, b} 同时禁止 a→b 与 b→a。
#[derive(Debug, Default, Clone)]
pub struct Exclusions {
    forbidden: HashSet<(Uuid, Uuid)>,
}

impl Exclusions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, a: Uuid, b: Uuid) {
        self.forbidden.insert((a, b));
        self.forbidden.insert((b, a));
    }

    pub fn forbids(&self, giver: Uuid, receiver: Uuid) -> bool {
        self.forbidden.contains(&(giver, receiver))
    }

    pub fn is_empty(&self) -> bool {
        self.forbidden.is_empty()
    }

    /// 无序对的数量
    pub fn len(&self) -> usize {
        self.forbidden.len() / 2
    }

    fn participants(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.forbidden.iter().map(|(a, _)| *a)
    }
}

impl FromIterator<(Uuid, Uuid)> for Exclusions {
    fn from_iter<I: IntoIterator<Item = (Uuid, Uuid)>>(iter: I) -> Self {
        let mut exclusions = Exclusions::new();
        for (a, b) in iter {
            exclusions.insert(a, b);
        }
        exclusions
    }
}

/// 抽签结果：giver → receiver 的双射。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pairs: HashMap<Uuid, Uuid>,
}

impl Assignment {
    pub fn receiver_of(&self, giver: &Uuid) -> Option<Uuid> {
        self.pairs.get(giver).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Uuid, Uuid)> + '_ {
        self.pairs.iter().map(|(giver, receiver)| (*giver, *receiver))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

pub fn draw(participants: &[Uuid], exclusions: &Exclusions) -> Result<Assignment, MatchError> {
    draw_with_rng(participants, exclusions, &mut OsRng)
}

pub fn draw_with_rng<R>(
    participants: &[Uuid],
    exclusions: &Exclusions,
    rng: &mut R,
) -> Result<Assignment, MatchError>
where
    R: Rng + CryptoRng + ?Sized,
{
    if participants.len() < MIN_PARTICIPANTS {
        return Err(MatchError::NotEnoughParticipants(participants.len()));
    }

    let members: HashSet<Uuid> = participants.iter().copied().collect();
    if members.len() != participants.len() {
        let mut seen = HashSet::with_capacity(participants.len());
        let duplicate = participants
            .iter()
            .find(|id| !seen.insert(**id))
            .copied()
            .unwrap_or_default();
        return Err(MatchError::DuplicateParticipant(duplicate));
    }

    if let Some(unknown) = exclusions.participants().find(|id| !members.contains(id)) {
        return Err(MatchError::UnknownParticipant(unknown));
    }

    let mut shuffled = participants.to_vec();
    for _ in 0..MAX_ATTEMPTS {
        shuffled.shuffle(rng);

        let valid = participants
            .iter()
            .zip(shuffled.iter())
            .all(|(giver, receiver)| giver != receiver && !exclusions.forbids(*giver, *receiver));

        if valid {
            let pairs = participants
                .iter()
                .copied()
                .zip(shuffled.iter().copied())
                .collect();
            return Ok(Assignment { pairs });
        }
    }

    Err(MatchError::NoFeasibleAssignment {
        attempts: MAX_ATTEMPTS,
    })
}
