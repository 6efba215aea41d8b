//! `pipe_contract` 集成测试：以外部 crate 视角验证管道的单线程数据契约。
//!
//! # 测试目标（Why）
//! - 保障写入、读取、分段增长与回收在公开 API 下正确协作；
//! - 覆盖分段容量附近的边界长度、部分读取、写端收尾与关闭后的错误语义。
//!
//! # 结构安排（How）
//! - `round_trip_*`：一次写入后完整读出；
//! - `interleaved_*`：交替写读不定长块，最终字节流一致；
//! - `segment_boundary_*`：通过 `ChainSnapshot` 观察分配与释放的时机；
//! - 其余用例覆盖 `finish`、`close`、配置校验与 IO trait 适配。

use std::io::{Read, Write};

use bytes::{Buf, Bytes};
use spark_pipe::{PipeConfig, PipeError, PipeReader, PipeWriter, pipe, pipe_with};

/// 帮助函数：以指定分段容量创建管道。
fn pipe_of(capacity: usize) -> (PipeWriter, PipeReader) {
    let config = PipeConfig::builder()
        .segment_capacity(capacity)
        .build()
        .expect("配置合法");
    pipe_with(config).expect("创建管道失败")
}

/// 帮助函数：确定性的伪随机序列，保证失败可复现。
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn range(&mut self, low: usize, high: usize) -> usize {
        low + (self.next() as usize) % (high - low)
    }
}

/// 帮助函数：循环读取直至收满 `len` 字节。
fn read_exact_len(reader: &mut PipeReader, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let read = reader.read(&mut out[filled..]).expect("读取失败");
        assert!(read > 0, "仍有数据时不应返回流结束");
        filled += read;
    }
    out
}

/// 验证分段容量附近的各个长度都能原样往返。
///
/// # 契约校验（What）
/// - 长度取 `B-1`、`B`、`B+1` 及跨越多个分段的值；
/// - 读出的字节序列与写入完全一致，读尽后管道为空。
#[test]
fn round_trip_boundary_lengths() {
    let capacity = 1024;
    let mut rng = XorShift(0x5eed);
    for len in [1, capacity - 1, capacity, capacity + 1, 3 * capacity, 5 * capacity + 7] {
        let (mut writer, mut reader) = pipe().expect("创建管道失败");
        let payload: Vec<u8> = (0..len).map(|_| rng.next() as u8).collect();
        writer.write(&payload).expect("写入失败");
        let out = read_exact_len(&mut reader, len);
        assert_eq!(out, payload, "长度 {len} 的往返结果不一致");
        assert_eq!(reader.snapshot().head_position, reader.snapshot().tail_position);
    }
}

/// 交替写入与读取不定长块，覆盖跨越大量分段的场景。
///
/// # 步骤说明（How）
/// 1. 每轮写入 1..1024 字节的递增序列，再请求读取 1..1024 字节；
/// 2. 写满总量后继续读取直到读尽；
/// 3. 校验读出序列连续递增，且 `total_read == total_written`。
#[test]
fn interleaved_production_and_consumption() {
    for seed in [1u64, 7, 42, 1_000_003] {
        let mut rng = XorShift(seed);
        let (mut writer, mut reader) = pipe_of(1024);
        let total = 64 * 1024 + rng.range(0, 4096);

        let mut next_in = 0u8;
        let mut next_out = 0u8;
        let mut written = 0usize;
        let mut read_total = 0usize;

        while written < total {
            let size = rng.range(1, 1024).min(total - written);
            let chunk: Vec<u8> = (0..size)
                .map(|_| {
                    let byte = next_in;
                    next_in = next_in.wrapping_add(1);
                    byte
                })
                .collect();
            writer.write(&chunk).expect("写入失败");
            written += size;

            let mut buf = vec![0u8; rng.range(1, 1024)];
            let read = reader.read(&mut buf).expect("读取失败");
            for byte in &buf[..read] {
                assert_eq!(*byte, next_out, "字节顺序被打乱");
                next_out = next_out.wrapping_add(1);
            }
            read_total += read;
        }

        while read_total < written {
            let mut buf = vec![0u8; rng.range(1, 1024)];
            let read = reader.read(&mut buf).expect("读取失败");
            for byte in &buf[..read] {
                assert_eq!(*byte, next_out, "字节顺序被打乱");
                next_out = next_out.wrapping_add(1);
            }
            read_total += read;
        }

        assert_eq!(read_total, written);
        assert_eq!(reader.snapshot().segments, 1, "读尽后只保留头分段");
    }
}

/// 请求多于已缓冲的字节时返回部分结果，下一次读取从停下处继续。
#[test]
fn partial_read_is_not_an_error() {
    let (mut writer, mut reader) = pipe_of(16);
    writer.write(b"abcdef").expect("写入失败");

    let mut buf = [0u8; 32];
    assert_eq!(reader.read(&mut buf).expect("部分读取不是错误"), 6);
    assert_eq!(&buf[..6], b"abcdef");

    writer.write(b"ghij").expect("写入失败");
    let mut small = [0u8; 2];
    assert_eq!(reader.read(&mut small).expect("读取失败"), 2);
    assert_eq!(&small, b"gh");
    assert_eq!(reader.read(&mut buf).expect("读取失败"), 2);
    assert_eq!(&buf[..2], b"ij");
}

/// 写入恰好一个分段容量的字节会分配且仅分配一个新分段；
/// 旧分段只有在被完全读取后才会释放。
#[test]
fn segment_boundary_allocation_and_release() {
    let (mut writer, mut reader) = pipe_of(8);
    assert_eq!(writer.snapshot().allocated_total, 1);

    writer.write(&[3u8; 8]).expect("写入失败");
    let after_write = writer.snapshot();
    assert_eq!(after_write.allocated_total, 2, "写满一个分段只应新增一个分段");
    assert_eq!(after_write.segments, 2);
    assert_eq!(after_write.head_position, 0);

    let mut buf = [0u8; 7];
    assert_eq!(reader.read(&mut buf).expect("读取失败"), 7);
    let partially_drained = reader.snapshot();
    assert_eq!(partially_drained.released_total, 0, "未排空的分段不得释放");
    assert_eq!(partially_drained.tail_position, 7);

    assert_eq!(reader.read(&mut buf).expect("读取失败"), 1);
    let drained = reader.snapshot();
    assert_eq!(drained.released_total, 1);
    assert_eq!(drained.segments, 1);
    assert_eq!(drained.tail_position, 0);
}

/// 单次读取不跨越分段边界。
#[test]
fn read_never_spans_segments() {
    let (mut writer, mut reader) = pipe_of(4);
    writer.write(b"0123456789").expect("写入失败");
    let mut buf = [0u8; 10];
    assert_eq!(reader.read(&mut buf).expect("读取失败"), 4);
    assert_eq!(reader.read(&mut buf[4..]).expect("读取失败"), 4);
    assert_eq!(reader.read(&mut buf[8..]).expect("读取失败"), 2);
    assert_eq!(&buf, b"0123456789");
}

/// `finish` 之后读端先读尽剩余数据，再得到 `Ok(0)`。
#[test]
fn finish_drains_then_signals_end_of_stream() {
    let (mut writer, mut reader) = pipe_of(4);
    writer.write(b"tail bytes").expect("写入失败");
    drop(writer);

    let mut collected = Vec::new();
    reader.read_to_end(&mut collected).expect("读取失败");
    assert_eq!(collected, b"tail bytes");

    let mut buf = [0u8; 4];
    assert_eq!(reader.read(&mut buf).expect("流结束不是错误"), 0);
    assert_eq!(reader.read(&mut buf).expect("流结束可重复观察"), 0);
}

/// 关闭后新的读写均以 `Closed` 失败，且关闭幂等。
#[test]
fn operations_after_close_are_rejected() {
    let (mut writer, mut reader) = pipe_of(4);
    writer.write(b"lost").expect("写入失败");
    let closer = writer.closer();
    closer.close();
    closer.close();
    reader.close();

    assert!(closer.is_closed());
    assert_eq!(writer.write(b"x"), Err(PipeError::Closed));
    let mut buf = [0u8; 4];
    assert_eq!(reader.read(&mut buf), Err(PipeError::Closed));
    assert_eq!(reader.snapshot().segments, 0);
}

/// 空写入与空缓冲读取立即返回。
#[test]
fn empty_operations_return_immediately() {
    let (mut writer, mut reader) = pipe_of(4);
    writer.write(&[]).expect("空写入应成功");
    assert_eq!(reader.read(&mut [0u8; 0]).expect("空缓冲读取应成功"), 0);
    assert_eq!(writer.snapshot().allocated_total, 1);
}

/// `write_buf` 逐块写入多段 `Buf`，`read_chunk` 以 `Bytes` 读出。
#[test]
fn buf_and_bytes_helpers_preserve_order() {
    let (mut writer, mut reader) = pipe_of(4);
    let chained = Bytes::from_static(b"head-").chain(Bytes::from_static(b"tail"));
    writer.write_buf(chained).expect("写入失败");

    let mut collected = Vec::new();
    while collected.len() < 9 {
        let chunk = reader.read_chunk(3).expect("读取失败");
        assert!(!chunk.is_empty());
        collected.extend_from_slice(&chunk);
    }
    assert_eq!(collected, b"head-tail");
}

/// 标准 IO trait 适配：`io::copy` 可以把管道当作普通读写对象。
#[test]
fn std_io_traits_bridge_the_pipe() {
    let (mut writer, mut reader) = pipe_of(5);
    Write::write_all(&mut writer, b"through std::io").expect("写入失败");
    Write::flush(&mut writer).expect("flush 不应失败");
    writer.finish();

    let mut sink = Vec::new();
    std::io::copy(&mut reader, &mut sink).expect("复制失败");
    assert_eq!(sink, b"through std::io");

    reader.close();
    let err = Read::read(&mut reader, &mut [0u8; 1]).expect_err("关闭后读取必须失败");
    assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
}

/// 非法配置与无法满足的分段容量在构造期同步失败。
#[test]
fn construction_failures_surface_synchronously() {
    let invalid = pipe_with(PipeConfig {
        segment_capacity: 0,
        label: None,
    })
    .expect_err("零容量必须被拒绝");
    assert!(matches!(invalid, PipeError::InvalidConfig { .. }));

    let oversized = pipe_with(PipeConfig {
        segment_capacity: usize::MAX,
        label: Some("oversized".into()),
    })
    .expect_err("超大分段必须分配失败");
    assert_eq!(
        oversized,
        PipeError::AllocationFailure {
            capacity: usize::MAX
        }
    );
}
