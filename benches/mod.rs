use criterion::{criterion_group, criterion_main};


criterion_group!(
    benches,
    pump::bench_send_and_ack,
    pump::bench_pump_idle,
    pump::bench_upload_buffer
);
criterion_main!(benches);
