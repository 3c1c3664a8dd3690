use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ws_endpoint::compiler::compile_frame;
use ws_endpoint::config::{EndpointConfig, Role};
use ws_endpoint::frame::OpCode;
use ws_endpoint::parser::FrameParser;
use ws_endpoint::pipeline::FrameDescriptor;

fn masked_text_frame(payload_len: usize) -> Vec<u8> {
    let descriptor = FrameDescriptor {
        msg: vec![b'a'; payload_len],
        rsv1: false,
        fin: true,
        opcode: OpCode::Text,
    };
    compile_frame(&descriptor, Some([0x12, 0x34, 0x56, 0x78]))
}

fn bench_parse_whole_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_whole_frame");
    for size in [32, 1024, 65536] {
        let wire = masked_text_frame(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &wire, |b, wire| {
            b.iter(|| {
                let mut parser = FrameParser::new(EndpointConfig::default().with_role(Role::Server));
                parser.feed(black_box(wire), &mut |_event| {});
            });
        });
    }
    group.finish();
}

fn bench_parse_byte_at_a_time(c: &mut Criterion) {
    let wire = masked_text_frame(256);
    c.bench_function("parse_byte_at_a_time_256b", |b| {
        b.iter(|| {
            let mut parser = FrameParser::new(EndpointConfig::default().with_role(Role::Server));
            for byte in &wire {
                parser.feed(black_box(std::slice::from_ref(byte)), &mut |_event| {});
            }
        });
    });
}

fn bench_compile_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_frame");
    for size in [32, 1024, 65536] {
        let descriptor =
            FrameDescriptor { msg: vec![b'a'; size], rsv1: false, fin: true, opcode: OpCode::Binary };
        group.bench_with_input(BenchmarkId::from_parameter(size), &descriptor, |b, descriptor| {
            b.iter(|| black_box(compile_frame(descriptor, Some([0x12, 0x34, 0x56, 0x78]))));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse_whole_frame, bench_parse_byte_at_a_time, bench_compile_frame);
criterion_main!(benches);
