#![no_main]

use hyperstore_storage::sstable::SSTableReader;
use libfuzzer_sys::fuzz_target;
use std::io::Write;

fuzz_target!(|data: &[u8]| {
    // Limit input size
    if data.len() > 10_000_000 {
        return;
    }

    // Write to temporary file and try to open as SSTable
    let Ok(mut temp_file) = tempfile::NamedTempFile::new() else {
        return;
    };
    if temp_file.write_all(data).is_err() {
        return;
    }
    let Ok(reader) = SSTableReader::open(temp_file.path()) else {
        return;
    };

    // A table that passes footer checks may still hold corrupt blocks
    let mut iter = reader.iter();
    while let Ok(Some(entry)) = iter.next_entry() {
        let _ = reader.get(&entry.key, u64::MAX, true);
    }
});
