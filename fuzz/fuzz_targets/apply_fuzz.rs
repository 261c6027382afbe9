#![no_main]
use libfuzzer_sys::fuzz_target;
use gitdelta::apply;
use gitdelta::delta::{DeltaApplier, Fill};

fuzz_target!(|data: &[u8]| {
    // The applier must never panic, only return errors.
    let _ = apply::apply_all(&[], data);

    // Split into base and delta, and pull in odd-sized chunks.
    if data.len() >= 2 {
        let split = data.len() / 2;
        let (base, delta) = data.split_at(split);
        let whole = apply::apply_all(base, delta);

        if let Ok(mut applier) = DeltaApplier::new(base, delta) {
            let mut out = Vec::new();
            let mut buf = [0u8; 13];
            let chunked = loop {
                match applier.fill(&mut buf) {
                    Ok(Fill::Written(n)) => out.extend_from_slice(&buf[..n]),
                    Ok(Fill::End) => break Ok(out),
                    Err(e) => break Err(e),
                }
            };
            // Chunking must not change the outcome.
            match (whole, chunked) {
                (Ok(a), Ok(b)) => assert_eq!(a, b),
                (Err(_), Err(_)) => {}
                (a, b) => panic!("whole {:?} vs chunked {:?}", a.is_ok(), b.is_ok()),
            }
        }
    }
});
