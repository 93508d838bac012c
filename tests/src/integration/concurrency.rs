//! # cs_main Under Contention
//!
//! The reentrant lock is exercised both directly and through the service
//! while other threads read and write.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use chainstate::{BlockValidity, ChainstateApi};
    use shared_lock::RecursiveSharedMutex;

    use crate::fixtures::{genesis, regtest_service, submit_all, ChainBuilder};

    #[test]
    fn test_upgrade_with_foreign_reader_restores_shared_count() {
        let owned = RecursiveSharedMutex::new();
        let lock = &owned;
        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        thread::scope(|s| {
            s.spawn(move || {
                lock.lock_shared();
                held_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                lock.unlock_shared();
            });
            held_rx.recv().unwrap();

            lock.lock_shared();
            lock.lock_shared();
            assert_eq!(lock.reader_count(), 2);

            // Let the foreign reader go once we are queued for the slot.
            let releaser = s.spawn(move || {
                thread::sleep(Duration::from_millis(50));
                release_tx.send(()).unwrap();
            });
            lock.lock();
            assert!(lock.held_exclusive());
            assert_eq!(lock.parked_count(), 2);
            lock.unlock();
            releaser.join().unwrap();

            assert_eq!(lock.shared_count(), 2);
            assert!(!lock.held_exclusive());
            lock.unlock_shared();
            lock.unlock_shared();
            assert!(!lock.held_by_current_thread());
        });
    }

    #[test]
    fn test_readers_observe_consistent_tips_during_activation() {
        let chainstate = regtest_service();
        let g = genesis();
        let blocks = ChainBuilder::on(&g, 0).take(40);
        chainstate.accept_block(g.clone()).unwrap();
        submit_all(&chainstate, &blocks);
        let done = AtomicBool::new(false);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    while !done.load(Ordering::Acquire) {
                        if let Some(tip) = chainstate.active_tip() {
                            let status = chainstate.block_status(&tip.hash).unwrap();
                            assert!(status.is_valid(BlockValidity::ScriptsValid));
                            assert!(chainstate.active_chain().len() as u64 > tip.height);
                        }
                    }
                });
            }

            let report = chainstate.activate_best_chain().unwrap();
            done.store(true, Ordering::Release);
            assert_eq!(report.connected.len(), 41);
        });

        assert_eq!(chainstate.active_tip().unwrap().hash, blocks[39].hash());
    }

    #[test]
    fn test_caller_holding_cs_main_can_drive_the_service() {
        let chainstate = regtest_service();
        let g = genesis();
        let blocks = ChainBuilder::on(&g, 0).take(3);

        let cs_main = chainstate.cs_main();
        cs_main.lock_shared();
        cs_main.lock_shared();

        chainstate.accept_block(g).unwrap();
        submit_all(&chainstate, &blocks);
        chainstate.activate_best_chain().unwrap();

        assert_eq!(cs_main.shared_count(), 2);
        assert_eq!(cs_main.parked_count(), 0);
        assert_eq!(chainstate.active_tip().unwrap().height, 3);

        cs_main.unlock_shared();
        cs_main.unlock_shared();
        assert!(!cs_main.held_by_current_thread());
    }
}
