//! Benchmark start-time extraction across container formats.

use bl_media::{container, id3, mp4, ts, ContainerFormat};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_segment_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_parsing");

    let init = mp4::write_init_segment(&mp4::InitSegmentSpec::new(mp4::TrackKind::Video, 90_000));
    group.bench_function("mp4_timescale", |b| {
        b.iter(|| mp4::read_timescale(black_box(&init)));
    });

    // 2 MB media segment: tfdt sits ahead of mdat.
    let media = mp4::write_media_segment(42, 1, 3_600 * 90_000, &vec![0u8; 2 * 1024 * 1024]);
    group.bench_function("mp4_tfdt_2mb", |b| {
        b.iter(|| container::extract_start_time(ContainerFormat::Mp4, black_box(&media), Some(90_000)));
    });

    // PTS found after 500 leading PAT/PMT-like packets.
    let mut ts_segment = Vec::new();
    for _ in 0..500 {
        let mut packet = [0xFFu8; ts::PACKET_SIZE];
        packet[0] = ts::SYNC_BYTE;
        packet[3] = 0x10;
        ts_segment.extend_from_slice(&packet);
    }
    ts_segment.extend_from_slice(&ts::write_pes_packet(0x100, 900_000, &[0u8; 64]));
    group.bench_function("ts_first_pts_500_packets", |b| {
        b.iter(|| ts::first_pts(black_box(&ts_segment)));
    });

    let mut priv_body = b"com.apple.streaming.transportStreamTimestamp\0".to_vec();
    priv_body.extend_from_slice(&900_000u64.to_be_bytes());
    let aac = id3::write_tag(&[("PRIV", &priv_body[..]), ("TIT2", &b"\x03Bench"[..])]);
    group.bench_function("id3_frames", |b| {
        b.iter(|| id3::parse_frames(black_box(&aac)));
    });

    group.finish();
}

criterion_group!(benches, bench_segment_parsing);
criterion_main!(benches);
