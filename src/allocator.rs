use {
    crate::LeaseId,
    rand::Rng,
    std::sync::atomic::{AtomicI64, Ordering},
};

///
/// Largest integer exactly representable by an IEEE-754 double (2^53 - 1).
///
/// Lease ids are kept strictly below it so clients that store them as doubles never lose precision.
pub const MAX_SAFE_LEASE_ID: LeaseId = (1 << 53) - 1;

///
/// Default floor for candidate ids. etcd hands out low-numbered ids when asked to pick one itself.
pub const MIN_LEASE_ID: LeaseId = 100_000;

///
/// Hands out candidate lease ids for grant attempts.
///
/// The sequence starts at a random point of the upper half of the safe range and cycles
/// between the floor and [`MAX_SAFE_LEASE_ID`]. The store is never asked whether an id is free,
/// a collision simply makes the grant fail and the caller asks for the next candidate.
///
#[derive(Debug)]
pub struct LeaseIdAllocator {
    next: AtomicI64,
    floor: LeaseId,
}

impl Default for LeaseIdAllocator {
    fn default() -> Self {
        Self::new(MIN_LEASE_ID)
    }
}

impl LeaseIdAllocator {
    ///
    /// Creates an allocator with a random starting point and the given floor.
    ///
    pub fn new(floor: LeaseId) -> Self {
        let start = rand::thread_rng().gen_range(MAX_SAFE_LEASE_ID / 2..MAX_SAFE_LEASE_ID);
        Self::starting_at(start, floor)
    }

    ///
    /// Creates an allocator whose first candidate is `start`.
    ///
    /// `floor` is clamped into `[1, MAX_SAFE_LEASE_ID)` and `start` into `[floor, MAX_SAFE_LEASE_ID)`.
    pub fn starting_at(start: LeaseId, floor: LeaseId) -> Self {
        let floor = floor.clamp(1, MAX_SAFE_LEASE_ID - 1);
        let start = start.clamp(floor, MAX_SAFE_LEASE_ID - 1);
        Self {
            next: AtomicI64::new(start),
            floor,
        }
    }

    pub fn floor(&self) -> LeaseId {
        self.floor
    }

    ///
    /// Returns the next candidate and advances the counter, wrapping back to the floor at the top of the range.
    ///
    pub fn next_candidate(&self) -> LeaseId {
        let floor = self.floor;
        let prev = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let advanced = current + 1;
                if advanced >= MAX_SAFE_LEASE_ID {
                    Some(floor)
                } else {
                    Some(advanced)
                }
            });
        // The closure never returns `None`.
        match prev {
            Ok(id) | Err(id) => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::sync::Arc};

    #[test]
    fn candidates_should_be_consecutive() {
        let allocator = LeaseIdAllocator::starting_at(500_000, MIN_LEASE_ID);
        assert_eq!(allocator.next_candidate(), 500_000);
        assert_eq!(allocator.next_candidate(), 500_001);
        assert_eq!(allocator.next_candidate(), 500_002);
    }

    #[test]
    fn it_should_wrap_to_the_floor_at_the_safe_maximum() {
        let allocator = LeaseIdAllocator::starting_at(MAX_SAFE_LEASE_ID - 2, 1_000);
        assert_eq!(allocator.next_candidate(), MAX_SAFE_LEASE_ID - 2);
        assert_eq!(allocator.next_candidate(), 1_000);
        assert_eq!(allocator.next_candidate(), 1_001);
    }

    #[test]
    fn random_start_should_land_in_the_upper_half() {
        for _ in 0..100 {
            let allocator = LeaseIdAllocator::default();
            let id = allocator.next_candidate();
            assert!(id >= MAX_SAFE_LEASE_ID / 2);
            assert!(id < MAX_SAFE_LEASE_ID);
        }
    }

    #[test]
    fn every_candidate_should_stay_within_bounds() {
        let allocator = LeaseIdAllocator::starting_at(MAX_SAFE_LEASE_ID - 50, MIN_LEASE_ID);
        for _ in 0..200 {
            let id = allocator.next_candidate();
            assert!(id >= MIN_LEASE_ID, "{id} below floor");
            assert!(id < MAX_SAFE_LEASE_ID, "{id} above safe maximum");
        }
    }

    #[test]
    fn invalid_floor_and_start_should_be_clamped() {
        let allocator = LeaseIdAllocator::starting_at(-5, -10);
        assert_eq!(allocator.floor(), 1);
        assert_eq!(allocator.next_candidate(), 1);

        let allocator = LeaseIdAllocator::starting_at(10, 2_000);
        assert_eq!(allocator.next_candidate(), 2_000);
    }

    #[test]
    fn concurrent_allocations_should_never_hand_out_the_same_id() {
        let allocator = Arc::new(LeaseIdAllocator::starting_at(1_000_000, MIN_LEASE_ID));
        let handles = (0..4)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                std::thread::spawn(move || {
                    (0..1_000)
                        .map(|_| allocator.next_candidate())
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();

        let mut all = handles
            .into_iter()
            .flat_map(|h| h.join().expect("allocation thread panicked"))
            .collect::<Vec<_>>();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 4_000);
    }
}
