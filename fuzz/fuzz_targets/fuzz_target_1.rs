#![no_main]

use libfuzzer_sys::fuzz_target;
use ws_endpoint::config::EndpointConfig;
use ws_endpoint::parser::FrameParser;

// Feeds arbitrary bytes straight into the frame parser, split at
// arbitrary boundaries, to shake out panics and buffer-accounting bugs
// the unit tests' hand-picked frames wouldn't hit. The parser is
// expected to report every malformed input as a `ParserEvent::Error`,
// never to panic.
fuzz_target!(|data: &[u8]| {
    let mut parser = FrameParser::new(EndpointConfig::default());
    for chunk in data.chunks(1 + (data.len() % 7)) {
        parser.feed(chunk, &mut |_event| {});
    }
});
