#![no_main]

use std::convert::Infallible;

use bytes::Bytes;
use futures_util::stream::once;
use http::{header, HeaderMap, HeaderValue};
use intake::{upload, LimitOverrides, Logger, ServerDefaults, UploadOptions, UploadRequest};
use libfuzzer_sys::fuzz_target;
use tokio::runtime;

const CONTENT_TYPES: [&str; 4] = [
    "multipart/form-data; boundary=X-BOUNDARY",
    "application/x-www-form-urlencoded",
    "application/json",
    "application/xml",
];

fuzz_target!(|data: &[u8]| {
    let (selector, body) = match data.split_first() {
        Some((selector, body)) => (*selector as usize, body.to_vec()),
        None => return,
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(CONTENT_TYPES[selector % CONTENT_TYPES.len()]),
    );

    let stream = once(async move { Ok::<_, Infallible>(Bytes::from(body)) });
    let defaults = ServerDefaults::new()
        .temp_dir(std::env::temp_dir().join("intake-fuzz"))
        .logger(Logger::disabled());
    let options = UploadOptions::new()
        .parse(true)
        .limits(LimitOverrides::new().size("64kb").files(2u64).fields(32u64));

    let rt = runtime::Builder::new_current_thread().enable_all().build().expect("runtime");
    rt.block_on(async {
        if let Ok(mut result) = upload(UploadRequest::new(headers, stream), &defaults, options).await {
            result.clear().await;
        }
    })
});
