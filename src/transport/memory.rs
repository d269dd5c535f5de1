//! 测试用的内存传输：可控的分块下发、可选择忽略 Range、统计并发连接数

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::{RangeResponse, Transport, TransportStream};
use crate::error::{DownloadError, Result};

#[derive(Debug, Default)]
struct Counters {
    opens: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// 连接存活期间计入 active
struct ActiveGuard(Arc<Counters>);

impl ActiveGuard {
    fn new(counters: Arc<Counters>) -> Self {
        let now = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak.fetch_max(now, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct StreamState {
    data: Bytes,
    pos: usize,
    chunk: usize,
    gate: Option<Arc<Semaphore>>,
    fail_at: Option<usize>,
    end_at: Option<usize>,
    _guard: ActiveGuard,
}

#[derive(Debug)]
pub(crate) struct MemoryTransport {
    data: Bytes,
    chunk: usize,
    honor_range: bool,
    gate: Option<Arc<Semaphore>>,
    fail_at: parking_lot::Mutex<Option<usize>>,
    end_at: parking_lot::Mutex<Option<usize>>,
    refuse: AtomicBool,
    counters: Arc<Counters>,
    offsets: parking_lot::Mutex<Vec<u64>>,
}

impl MemoryTransport {
    pub(crate) fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            chunk: 100,
            honor_range: true,
            gate: None,
            fail_at: parking_lot::Mutex::new(None),
            end_at: parking_lot::Mutex::new(None),
            refuse: AtomicBool::new(false),
            counters: Arc::new(Counters::default()),
            offsets: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// 每下发一个分块前需要从 gate 取得一个许可
    pub(crate) fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk;
        self
    }

    /// 模拟不支持 Range 的服务器
    pub(crate) fn ignore_range(mut self) -> Self {
        self.honor_range = false;
        self
    }

    /// 下一次连接读到绝对位置 `pos` 时返回一次 I/O 错误，之后的连接正常
    pub(crate) fn fail_at(mut self, pos: usize) -> Self {
        self.fail_at = parking_lot::Mutex::new(Some(pos));
        self
    }

    /// 下一次连接在绝对位置 `pos` 处正常结束（数据不完整），之后的连接正常
    pub(crate) fn end_early_at(mut self, pos: usize) -> Self {
        self.end_at = parking_lot::Mutex::new(Some(pos));
        self
    }

    pub(crate) fn set_refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub(crate) fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    pub(crate) fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    /// 每次 open 请求的偏移量
    pub(crate) fn requested_offsets(&self) -> Vec<u64> {
        self.offsets.lock().clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, _url: &str, offset: u64) -> Result<TransportStream> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(DownloadError::Transport("connection refused".to_string()));
        }
        self.offsets.lock().push(offset);
        self.counters.opens.fetch_add(1, Ordering::SeqCst);

        let len = self.data.len() as u64;
        let (range, start) = if offset == 0 || !self.honor_range {
            (RangeResponse::Full, 0)
        } else if offset >= len {
            return Ok(TransportStream::exhausted());
        } else {
            (RangeResponse::Partial { start: offset }, offset as usize)
        };

        let state = StreamState {
            data: self.data.clone(),
            pos: start,
            chunk: self.chunk,
            gate: self.gate.clone(),
            fail_at: self.fail_at.lock().take(),
            end_at: self.end_at.lock().take(),
            _guard: ActiveGuard::new(self.counters.clone()),
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            let limit = st.end_at.map_or(st.data.len(), |end| end.min(st.data.len()));
            if st.pos >= limit {
                return None;
            }
            if let Some(gate) = st.gate.clone() {
                gate.acquire_owned().await.ok()?.forget();
            }
            if let Some(fail_at) = st.fail_at {
                if st.pos >= fail_at {
                    st.fail_at = None;
                    st.pos = st.data.len();
                    let err = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset");
                    return Some((Err(err), st));
                }
            }
            let mut end = (st.pos + st.chunk).min(limit);
            if let Some(fail_at) = st.fail_at {
                if fail_at > st.pos {
                    end = end.min(fail_at);
                }
            }
            let piece = st.data.slice(st.pos..end);
            st.pos = end;
            Some((Ok(piece), st))
        })
        .boxed();

        Ok(TransportStream {
            range,
            total: Some(len),
            stream,
        })
    }
}
