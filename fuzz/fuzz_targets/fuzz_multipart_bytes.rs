#![no_main]

use std::convert::Infallible;

use bytes::Bytes;
use futures_util::stream::iter;
use intake::{Limits, Multipart};
use libfuzzer_sys::fuzz_target;
use tokio::runtime;

fuzz_target!(|data: &[u8]| {
    // split the input so boundaries land across chunk edges
    let mid = data.len() / 2;
    let chunks = vec![
        Ok::<_, Infallible>(Bytes::copy_from_slice(&data[..mid])),
        Ok(Bytes::copy_from_slice(&data[mid..])),
    ];

    let limits = Limits {
        max_parts: Some(64),
        max_header_pairs: Some(16),
        ..Limits::unbounded()
    };
    let mut multipart = Multipart::with_limits(iter(chunks), "X-BOUNDARY", limits);

    let rt = runtime::Builder::new_current_thread().build().expect("runtime");
    rt.block_on(async {
        let mut breaks = 0;
        while breaks < 3 {
            match multipart.next_field().await {
                Err(_) | Ok(None) => breaks += 1,
                Ok(Some(field)) => {
                    let _ = field.bytes().await;
                }
            }
        }
    })
});
