//! Concurrent fan-in.
//!
//! [`UnionStream`] drives its inputs from a pool of worker threads and hands
//! blocks out in arrival order. Workers take an input from a shared queue,
//! read one block, and put the input back, so a slow input does not starve
//! the others. Inputs carrying the unmatched rows of an outer join are read
//! by the consuming thread once every worker is done.
//!
//! [`AsynchronousStream`] runs one input on its own thread, one block ahead of
//! the consumer.

use super::{merge_extremes, BlockStream, BoxedStream};
use crate::block::{Block, Header};
use crate::context::{HookPoint, QueryContext};
use crate::error::{QueryError, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use tracing::trace;

enum Message {
    Block(Block),
    /// An input is exhausted; carries what it reports.
    Finished { totals: Option<Block>, extremes: Option<Block> },
    Error(QueryError),
}

struct Running {
    rx: Receiver<Message>,
    handles: Vec<JoinHandle<()>>,
}

pub struct UnionStream {
    header: Header,
    /// Main inputs first, then the non-joined inputs.
    inputs: Vec<BoxedStream>,
    main_inputs: usize,
    max_threads: usize,
    ctx: QueryContext,
    stop: Arc<AtomicBool>,
    running: Option<Running>,
    started: bool,
    workers_done: bool,
    totals: Option<Block>,
    extremes: Vec<Block>,
    failed: bool,
}

impl UnionStream {
    #[must_use]
    pub fn new(
        inputs: Vec<BoxedStream>,
        non_joined: Vec<BoxedStream>,
        max_threads: usize,
        ctx: &QueryContext,
    ) -> Self {
        let header = inputs.first().or_else(|| non_joined.first()).map(|s| s.header()).unwrap_or_default();
        let main_inputs = inputs.len();
        let mut all = inputs;
        all.extend(non_joined);
        Self {
            header,
            inputs: all,
            main_inputs,
            max_threads: max_threads.max(1),
            ctx: ctx.clone(),
            stop: Arc::new(AtomicBool::new(false)),
            running: None,
            started: false,
            workers_done: false,
            totals: None,
            extremes: Vec::new(),
            failed: false,
        }
    }

    fn start(&mut self) {
        self.started = true;
        let main: Vec<BoxedStream> = self.inputs.drain(..self.main_inputs).collect();
        self.main_inputs = 0;
        let threads = self.max_threads.min(main.len());
        trace!(inputs = main.len(), threads, "starting union workers");
        if threads == 0 {
            self.workers_done = true;
            return;
        }
        let queue = Arc::new(Mutex::new(main.into_iter().collect::<VecDeque<_>>()));
        let (tx, rx) = sync_channel(threads);
        let handles = (0..threads)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let tx = tx.clone();
                let stop = Arc::clone(&self.stop);
                let ctx = self.ctx.clone();
                std::thread::spawn(move || worker(&queue, &tx, &stop, &ctx))
            })
            .collect();
        self.running = Some(Running { rx, handles });
    }

    fn absorb_finished(&mut self, totals: Option<Block>, extremes: Option<Block>) {
        if self.totals.is_none() {
            self.totals = totals;
        }
        self.extremes.extend(extremes);
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(running) = self.running.take() {
            drop(running.rx);
            for handle in running.handles {
                let _ = handle.join();
            }
        }
    }

    fn read_non_joined(&mut self) -> Result<Option<Block>> {
        while let Some(input) = self.inputs.first_mut() {
            if let Some(block) = input.read()? {
                return Ok(Some(block));
            }
            let finished = self.inputs.remove(0);
            self.absorb_finished(finished.totals()?, finished.extremes());
        }
        Ok(None)
    }
}

fn worker(
    queue: &Mutex<VecDeque<BoxedStream>>,
    tx: &SyncSender<Message>,
    stop: &AtomicBool,
    ctx: &QueryContext,
) {
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        let Some(mut input) = next else {
            return;
        };
        let step = ctx.hook(HookPoint::UnionWorker).and_then(|()| {
            ctx.cancel.check()?;
            input.read()
        });
        match step {
            Ok(Some(block)) => {
                if tx.send(Message::Block(block)).is_err() {
                    input.cancel();
                    return;
                }
                if stop.load(Ordering::SeqCst) {
                    input.cancel();
                    return;
                }
                queue.lock().unwrap_or_else(PoisonError::into_inner).push_back(input);
            }
            Ok(None) => {
                let message = match input.totals() {
                    Ok(totals) => Message::Finished { totals, extremes: input.extremes() },
                    Err(e) => Message::Error(e),
                };
                if tx.send(message).is_err() {
                    return;
                }
            }
            Err(e) => {
                stop.store(true, Ordering::SeqCst);
                let _ = tx.send(Message::Error(e));
                return;
            }
        }
    }
}

impl BlockStream for UnionStream {
    fn name(&self) -> &'static str {
        "Union"
    }

    fn header(&self) -> Header {
        self.header.clone()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        if self.failed {
            return Ok(None);
        }
        if !self.started {
            self.start();
        }
        while !self.workers_done {
            let message = self.running.as_ref().and_then(|r| r.rx.recv().ok());
            match message {
                Some(Message::Block(block)) => return Ok(Some(block)),
                Some(Message::Finished { totals, extremes }) => self.absorb_finished(totals, extremes),
                Some(Message::Error(e)) => {
                    self.failed = true;
                    self.shutdown();
                    return Err(e);
                }
                None => {
                    self.workers_done = true;
                    self.shutdown();
                }
            }
        }
        let block = self.read_non_joined();
        if block.is_err() {
            self.failed = true;
        }
        block
    }

    fn inputs(&self) -> &[BoxedStream] {
        &self.inputs
    }

    fn inputs_mut(&mut self) -> &mut [BoxedStream] {
        &mut self.inputs
    }

    fn totals(&self) -> Result<Option<Block>> {
        if self.totals.is_some() {
            return Ok(self.totals.clone());
        }
        for input in &self.inputs {
            if let Some(totals) = input.totals()? {
                return Ok(Some(totals));
            }
        }
        Ok(None)
    }

    fn extremes(&self) -> Option<Block> {
        merge_extremes(self.extremes.iter().cloned().chain(self.inputs.iter().filter_map(|s| s.extremes())))
    }

    fn cancel(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for input in &mut self.inputs {
            input.cancel();
        }
    }

    fn describe(&self) -> String {
        format!("max threads {}", self.max_threads)
    }
}

impl Drop for UnionStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Reads its input on a background thread, keeping one block ready.
pub struct AsynchronousStream {
    header: Header,
    input: Vec<BoxedStream>,
    stop: Arc<AtomicBool>,
    running: Option<Running>,
    finished: bool,
    totals: Option<Block>,
    extremes: Option<Block>,
}

impl AsynchronousStream {
    #[must_use]
    pub fn new(input: BoxedStream) -> Self {
        Self {
            header: input.header(),
            input: vec![input],
            stop: Arc::new(AtomicBool::new(false)),
            running: None,
            finished: false,
            totals: None,
            extremes: None,
        }
    }

    fn start(&mut self) {
        let Some(mut input) = self.input.pop() else {
            self.finished = true;
            return;
        };
        let (tx, rx) = sync_channel(0);
        let stop = Arc::clone(&self.stop);
        let handle = std::thread::spawn(move || {
            loop {
                if stop.load(Ordering::SeqCst) {
                    input.cancel();
                    return;
                }
                let message = match input.read() {
                    Ok(Some(block)) => Message::Block(block),
                    Ok(None) => match input.totals() {
                        Ok(totals) => Message::Finished { totals, extremes: input.extremes() },
                        Err(e) => Message::Error(e),
                    },
                    Err(e) => Message::Error(e),
                };
                let last = !matches!(message, Message::Block(_));
                if tx.send(message).is_err() || last {
                    return;
                }
            }
        });
        self.running = Some(Running { rx, handles: vec![handle] });
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(running) = self.running.take() {
            drop(running.rx);
            for handle in running.handles {
                let _ = handle.join();
            }
        }
    }
}

impl BlockStream for AsynchronousStream {
    fn name(&self) -> &'static str {
        "Asynchronous"
    }

    fn header(&self) -> Header {
        self.header.clone()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        if self.finished {
            return Ok(None);
        }
        if self.running.is_none() {
            self.start();
        }
        let message = self.running.as_ref().and_then(|r| r.rx.recv().ok());
        match message {
            Some(Message::Block(block)) => Ok(Some(block)),
            Some(Message::Finished { totals, extremes }) => {
                self.totals = totals;
                self.extremes = extremes;
                self.finished = true;
                self.shutdown();
                Ok(None)
            }
            Some(Message::Error(e)) => {
                self.finished = true;
                self.shutdown();
                Err(e)
            }
            None => {
                self.finished = true;
                self.shutdown();
                Ok(None)
            }
        }
    }

    fn inputs(&self) -> &[BoxedStream] {
        &self.input
    }

    fn inputs_mut(&mut self) -> &mut [BoxedStream] {
        &mut self.input
    }

    fn totals(&self) -> Result<Option<Block>> {
        match self.input.first() {
            Some(input) => input.totals(),
            None => Ok(self.totals.clone()),
        }
    }

    fn extremes(&self) -> Option<Block> {
        self.input.first().map_or_else(|| self.extremes.clone(), |input| input.extremes())
    }

    fn cancel(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for input in &mut self.input {
            input.cancel();
        }
    }
}

impl Drop for AsynchronousStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Field;
    use crate::storage::Catalog;
    use crate::settings::Settings;
    use crate::streams::{read_to_end, BlocksStream};
    use crate::types::{DataType, Value};

    fn chain(values: &[i64]) -> BoxedStream {
        let header = Header::new(vec![Field::new("x", DataType::Int64)]);
        let blocks = values.iter().map(|&v| Block::from_rows(&header, vec![vec![Value::Int(v)]]).unwrap()).collect();
        Box::new(BlocksStream::new(header, blocks))
    }

    #[test]
    fn union_yields_every_block_and_non_joined_last() {
        let ctx = QueryContext::new(Settings::default(), Arc::new(Catalog::new()));
        let mut s = UnionStream::new(vec![chain(&[1, 2, 3]), chain(&[4, 5])], vec![chain(&[99])], 2, &ctx);
        let blocks = read_to_end(&mut s).unwrap();
        let values: Vec<Value> = blocks.iter().map(|b| b.columns[0].values[0].clone()).collect();
        assert_eq!(values.len(), 6);
        assert_eq!(values.last(), Some(&Value::Int(99)));
        let mut sorted = values.clone();
        sorted.sort();
        assert_eq!(sorted, (1..=5).chain([99]).map(Value::Int).collect::<Vec<_>>());
    }

    #[test]
    fn asynchronous_preserves_order() {
        let mut s = AsynchronousStream::new(chain(&[3, 1, 2]));
        let values: Vec<Value> =
            read_to_end(&mut s).unwrap().iter().map(|b| b.columns[0].values[0].clone()).collect();
        assert_eq!(values, vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
    }
}
