#![no_main]
use libfuzzer_sys::fuzz_target;
use gitdelta::apply;
use gitdelta::delta::{DeltaHeader, DeltaWriter};

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // First byte picks the split between base and target.
    let split = data[0] as usize % data.len();
    let payload = &data[1..];
    let (base, target) = payload.split_at(split.min(payload.len()));

    // Copy the longest common prefix from the base, insert the rest.
    let common = base.iter().zip(target).take_while(|(a, b)| a == b).count();

    let header = DeltaHeader {
        base_size: base.len() as u64,
        result_size: target.len() as u64,
    };
    let mut w = DeltaWriter::new(Vec::new(), header).unwrap();
    w.copy(0, common as u64).unwrap();
    w.insert(&target[common..]).unwrap();
    let delta = w.finish().unwrap();

    let decoded = apply::apply_all(base, &delta).unwrap();
    assert_eq!(decoded, target);
});
