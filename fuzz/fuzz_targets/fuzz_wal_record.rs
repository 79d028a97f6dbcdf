#![no_main]

use hyperstore_wal::record::WalRecord;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Limit input size to prevent timeout
    if data.len() > 1_000_000 {
        return;
    }

    // Decoding must never panic; anything accepted must re-encode to an equal record
    if let Ok((record, consumed)) = WalRecord::decode(data) {
        assert!(consumed <= data.len());
        let encoded = record.encode().expect("decoded record re-encodes");
        let (again, _) = WalRecord::decode(&encoded).expect("re-encoded record decodes");
        assert_eq!(record, again);
    }
});
