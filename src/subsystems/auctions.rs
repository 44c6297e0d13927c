//! # Auction house across copyover.
//!
//! The module-pattern participant: it owns its live state (the active
//! auction and recent history) rather than reading a shared world, and the
//! embedding server constructs and registers it like any other game
//! module.
//!
//! Timing is the interesting part. An auction seconds from its hammer
//! cannot fairly pause for a reboot, so `can_copyover` grades by time
//! remaining: under 30 seconds is a hard veto, under two minutes a soft
//! one. An auction that ends while the world is frozen is settled
//! immediately after restore.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::SubsystemError;
use crate::registry::{GatherOutcome, Subsystem, Veto};
use crate::snapshot;
use crate::world::UserId;

/// Hard-veto threshold: auctions this close to the hammer block copyover.
const HARD_VETO_WINDOW: Duration = Duration::from_secs(30);
/// Soft-veto threshold: auctions this close produce a warning only.
const SOFT_VETO_WINDOW: Duration = Duration::from_secs(120);

/// A running auction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionItem {
    /// Item template on the block.
    pub item_id: i64,
    /// Seller.
    pub seller_user_id: UserId,
    /// Seller display name.
    pub seller_name: String,
    /// Whether the seller is hidden.
    #[serde(default)]
    pub anonymous: bool,
    /// Hammer time.
    pub end_time: SystemTime,
    /// Opening price.
    pub minimum_bid: u64,
    /// Current best bid, zero when unbid.
    #[serde(default)]
    pub highest_bid: u64,
    /// Current best bidder.
    #[serde(default)]
    pub highest_bid_user_id: Option<UserId>,
    /// Bidder display name.
    #[serde(default)]
    pub highest_bidder_name: String,
}

/// A settled auction, kept for the house history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PastAuction {
    /// Item that was sold (or passed in).
    pub item_id: i64,
    /// Final price, zero when unsold.
    pub final_bid: u64,
    /// Winning bidder, when sold.
    pub winner_user_id: Option<UserId>,
    /// When the hammer fell.
    pub ended_at: SystemTime,
}

#[derive(Serialize, Deserialize)]
struct AuctionsBlob {
    active: Option<AuctionItem>,
    past: Vec<PastAuction>,
    saved_at: SystemTime,
}

struct House {
    active: Option<AuctionItem>,
    past: Vec<PastAuction>,
}

/// Auction-house module and copyover participant.
pub struct AuctionsSubsystem {
    cfg: Config,
    house: Mutex<House>,
    max_history: usize,
}

impl AuctionsSubsystem {
    /// Creates an empty auction house.
    pub fn new(cfg: Config) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            house: Mutex::new(House {
                active: None,
                past: Vec::new(),
            }),
            max_history: 10,
        })
    }

    /// Puts an item on the block. Returns false when an auction is
    /// already running.
    pub fn start_auction(&self, auction: AuctionItem) -> bool {
        let mut house = self.house.lock().unwrap();
        if house.active.is_some() {
            return false;
        }
        house.active = Some(auction);
        true
    }

    /// The running auction, if any.
    pub fn active_auction(&self) -> Option<AuctionItem> {
        self.house.lock().unwrap().active.clone()
    }

    /// Settled auctions, newest last.
    pub fn past_auctions(&self) -> Vec<PastAuction> {
        self.house.lock().unwrap().past.clone()
    }

    fn settle_locked(&self, house: &mut House, now: SystemTime) {
        let Some(auction) = house.active.take() else {
            return;
        };
        if auction.end_time > now {
            house.active = Some(auction);
            return;
        }
        tracing::info!(
            item = auction.item_id,
            final_bid = auction.highest_bid,
            "auction ended during copyover; settling"
        );
        house.past.push(PastAuction {
            item_id: auction.item_id,
            final_bid: auction.highest_bid,
            winner_user_id: auction.highest_bid_user_id,
            ended_at: auction.end_time,
        });
        let excess = house.past.len().saturating_sub(self.max_history);
        house.past.drain(..excess);
    }
}

#[async_trait]
impl Subsystem for AuctionsSubsystem {
    fn name(&self) -> &'static str {
        "auctions"
    }

    fn can_copyover(&self) -> Option<Veto> {
        let house = self.house.lock().unwrap();
        let auction = house.active.as_ref()?;
        let remaining = auction
            .end_time
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);

        if remaining < HARD_VETO_WINDOW {
            Some(Veto::hard(format!(
                "auction ending in {}s",
                remaining.as_secs()
            )))
        } else if remaining < SOFT_VETO_WINDOW {
            Some(Veto::soft(format!(
                "auction ending in {}s",
                remaining.as_secs()
            )))
        } else {
            None
        }
    }

    async fn gather(&self) -> Result<GatherOutcome, SubsystemError> {
        let house = self.house.lock().unwrap();
        if house.active.is_none() && house.past.is_empty() {
            return Ok(GatherOutcome::Nothing);
        }
        let blob = AuctionsBlob {
            active: house.active.clone(),
            past: house.past.clone(),
            saved_at: SystemTime::now(),
        };
        drop(house);

        let bytes = serde_json::to_vec(&blob).map_err(SubsystemError::Encode)?;
        snapshot::write_blob(&self.cfg, self.name(), &bytes)?;
        Ok(GatherOutcome::Saved)
    }

    async fn restore(&self) -> Result<(), SubsystemError> {
        let Some(bytes) = snapshot::read_blob(&self.cfg, self.name())? else {
            return Ok(());
        };
        let blob: AuctionsBlob = serde_json::from_slice(&bytes).map_err(SubsystemError::Decode)?;

        let mut house = self.house.lock().unwrap();
        house.active = blob.active;
        house.past = blob.past;
        self.settle_locked(&mut house, SystemTime::now());
        drop(house);

        snapshot::remove_blob(&self.cfg, self.name());
        Ok(())
    }

    async fn prepare(&self) -> Result<(), SubsystemError> {
        // Nothing to pause: the hammer is round-driven and no rounds fire
        // while the world is quiescent.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::VetoSeverity;

    fn auction_ending_in(secs: u64) -> AuctionItem {
        AuctionItem {
            item_id: 456,
            seller_user_id: 1,
            seller_name: "Seller".into(),
            anonymous: false,
            end_time: SystemTime::now() + Duration::from_secs(secs),
            minimum_bid: 50,
            highest_bid: 75,
            highest_bid_user_id: Some(2),
            highest_bidder_name: "Bidder".into(),
        }
    }

    fn subsystem() -> (Arc<AuctionsSubsystem>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::with_data_dir(dir.path());
        (AuctionsSubsystem::new(cfg), dir)
    }

    #[test]
    fn no_active_auction_allows_copyover() {
        let (sub, _dir) = subsystem();
        assert!(sub.can_copyover().is_none());
    }

    #[test]
    fn veto_grades_by_time_remaining() {
        let (sub, _dir) = subsystem();

        assert!(sub.start_auction(auction_ending_in(300)));
        assert!(sub.can_copyover().is_none());

        sub.house.lock().unwrap().active = Some(auction_ending_in(90));
        let veto = sub.can_copyover().unwrap();
        assert_eq!(veto.severity, VetoSeverity::Soft);
        assert!(veto.reason.contains("auction ending in"));

        sub.house.lock().unwrap().active = Some(auction_ending_in(20));
        let veto = sub.can_copyover().unwrap();
        assert_eq!(veto.severity, VetoSeverity::Hard);
    }

    #[tokio::test]
    async fn running_auction_round_trips() {
        let (sub, dir) = subsystem();
        sub.start_auction(auction_ending_in(600));
        assert_eq!(sub.gather().await.unwrap(), GatherOutcome::Saved);

        let cfg = Config::with_data_dir(dir.path());
        let successor = AuctionsSubsystem::new(cfg);
        successor.restore().await.unwrap();

        let auction = successor.active_auction().unwrap();
        assert_eq!(auction.item_id, 456);
        assert_eq!(auction.highest_bid, 75);
        assert_eq!(auction.highest_bid_user_id, Some(2));
    }

    #[tokio::test]
    async fn auction_ended_mid_copyover_is_settled_on_restore() {
        let (sub, dir) = subsystem();
        // Hammer time passes while the world is frozen.
        sub.house.lock().unwrap().active = Some(AuctionItem {
            end_time: SystemTime::now() - Duration::from_secs(1),
            ..auction_ending_in(0)
        });
        sub.gather().await.unwrap();

        let cfg = Config::with_data_dir(dir.path());
        let successor = AuctionsSubsystem::new(cfg);
        successor.restore().await.unwrap();

        assert!(successor.active_auction().is_none());
        let past = successor.past_auctions();
        assert_eq!(past.len(), 1);
        assert_eq!(past[0].final_bid, 75);
        assert_eq!(past[0].winner_user_id, Some(2));
    }

    #[tokio::test]
    async fn second_auction_is_rejected_while_one_runs() {
        let (sub, _dir) = subsystem();
        assert!(sub.start_auction(auction_ending_in(600)));
        assert!(!sub.start_auction(auction_ending_in(600)));
    }
}
