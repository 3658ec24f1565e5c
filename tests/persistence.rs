#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use tolling_core::collaborators::{MessageKind, Transport, TransportError};
    use tolling_core::fix::{FixRecord, PositionRecord};
    use tolling_core::queue::persistence::QueueFile;
    use tolling_core::queue::TransmissionQueue;
    use tolling_core::store::MemoryStore;

    #[derive(Default)]
    struct MockTransport {
        sent: Mutex<Vec<(MessageKind, Vec<String>)>>,
    }

    impl Transport for MockTransport {
        fn start(&self) {}

        fn stop(&self) {}

        fn send(&self, fixes: &[FixRecord], kind: MessageKind) -> Result<(), TransportError> {
            let ids = fixes.iter().map(|fix| fix.id.clone()).collect();
            self.sent.lock().unwrap().push((kind, ids));
            Ok(())
        }

        fn publish_axles_change(&self, _transaction_id: &str, _axles: u32) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn directory(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tolling_core_persistence_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::new().with("filter_time", 0).with("max_packet", 2))
    }

    fn position(i: u64) -> PositionRecord {
        PositionRecord {
            latitude: 44.5 + i as f64 * 0.002,
            longitude: 11.3,
            heading: 90.0,
            speed: 80.0,
            timestamp_ms: 1_700_000_000_000 + 1_000 * i,
            ..PositionRecord::default()
        }
    }

    fn queue_with_saved_fixes(name: &str, count: u64) -> (Arc<MemoryStore>, QueueFile, Vec<FixRecord>) {
        let store = store();
        let file = QueueFile::new(&directory(name), "TRACKING");
        let mut queue = TransmissionQueue::new(store.clone(), Arc::new(MockTransport::default()), file.clone());
        queue.set_cut_off(false);
        for i in 0..count {
            queue.push(&position(i), i as f64 * 0.2);
        }
        let saved = queue.snapshot();
        queue.shutdown();
        (store, file, saved)
    }

    #[test]
    fn test_restart_restores_and_sends_saved_fixes() {
        let (store, file, saved) = queue_with_saved_fixes("restore", 3);
        assert!(file.exists());
        assert!(file.hash_path().exists());

        let transport = Arc::new(MockTransport::default());
        let mut queue = TransmissionQueue::new(store, transport.clone(), file.clone());
        assert_eq!(queue.snapshot(), saved);
        assert!(!file.exists());
        assert!(!file.hash_path().exists());

        queue.set_connected(true);
        queue.shutdown();
        let sent = transport.sent.lock().unwrap();
        assert_eq!(
            *sent,
            vec![
                (MessageKind::Tracking, vec!["1".to_string(), "2".to_string()]),
                (MessageKind::Tracking, vec!["3".to_string()]),
            ]
        );
    }

    #[test]
    fn test_corrupted_file_is_discarded_once() {
        let (store, file, _) = queue_with_saved_fixes("corrupted", 2);

        let mut data = std::fs::read(file.fix_path()).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        std::fs::write(file.fix_path(), data).unwrap();

        let queue = TransmissionQueue::new(store, Arc::new(MockTransport::default()), file.clone());
        assert!(queue.is_empty());
        assert!(!file.exists());
        assert!(!file.hash_path().exists());
    }

    #[test]
    fn test_missing_hash_discards_fixes() {
        let (store, file, _) = queue_with_saved_fixes("missing_hash", 2);
        std::fs::remove_file(file.hash_path()).unwrap();

        let queue = TransmissionQueue::new(store, Arc::new(MockTransport::default()), file.clone());
        assert!(queue.is_empty());
        assert!(!file.exists());
    }

    #[test]
    fn test_empty_queue_writes_nothing() {
        let (_, file, saved) = queue_with_saved_fixes("empty", 0);
        assert!(saved.is_empty());
        assert!(!file.exists());
        assert!(!file.hash_path().exists());
    }
}
