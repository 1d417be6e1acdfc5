mod tests {
    use strandcast::clock::{Clock, Deadline, FOREVER};

    #[test]
    fn fresh_deadline_is_not_expired() {
        for delta in [1u32, 50, 1000, FOREVER - 1, FOREVER] {
            let deadline = Deadline::after(1000, delta);
            assert!(!deadline.expired(1000), "delta {}", delta);
        }
    }

    #[test]
    fn deadline_expires_after_delta() {
        let deadline = Deadline::after(1000, 500);
        assert!(!deadline.expired(1499));
        assert!(deadline.expired(1500));
        assert!(deadline.expired(1501));
    }

    #[test]
    fn zero_delta_expires_immediately() {
        let deadline = Deadline::after(77, 0);
        assert!(deadline.expired(77));
    }

    #[test]
    fn expired_deadline_stays_expired_for_half_the_range() {
        let deadline = Deadline::after(0, 100);
        // Just expired
        assert!(deadline.expired(100));
        // Still expired half the counter range later
        assert!(deadline.expired(100u32.wrapping_add(FOREVER)));
    }

    #[test]
    fn delta_saturates_at_half_the_range() {
        let near = Deadline::after(0, u32::MAX);
        let far = Deadline::after(0, FOREVER);
        assert_eq!(near, far);
        assert!(!near.expired(0));
    }

    #[test]
    fn arithmetic_survives_counter_wraparound() {
        let deadline = Deadline::after(u32::MAX - 10, 100);
        assert!(!deadline.expired(u32::MAX - 10));
        assert!(!deadline.expired(u32::MAX));
        // 100 ms later the counter has wrapped to 89
        assert!(!deadline.expired(88));
        assert!(deadline.expired(89));
    }

    #[test]
    fn remaining_counts_down_to_zero() {
        let deadline = Deadline::after(500, 200);
        assert_eq!(deadline.remaining(500), 200);
        assert_eq!(deadline.remaining(600), 100);
        assert_eq!(deadline.remaining(700), 0);
        assert_eq!(deadline.remaining(900), 0);
    }

    #[test]
    fn clock_delay_spins_until_expiry() {
        struct Counting(core::cell::Cell<u32>);
        impl Clock for Counting {
            fn now(&self) -> u32 {
                self.0.get()
            }

            fn idle(&self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let clock = Counting(core::cell::Cell::new(100));
        clock.delay(50);
        assert_eq!(clock.now(), 150);
    }
}
