//! 协作式调度器
//!
//! 用具名任务代替散落的定时器对象：周期任务和可取消的单次任务都登记在这里，
//! 由宿主线程调用 [`Scheduler::pop_due`] 逐个取出到期任务执行。
//! 调度器本身不读时钟，`now` 由调用方传入，因此顺序与取消都可以脱离事件循环测试。

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskKind {
    Periodic(Duration),
    Once,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    kind: TaskKind,
    deadline: Instant,
    seq: u64, // 同一截止时间按登记顺序执行
}

/// 具名任务调度器
#[derive(Debug)]
pub struct Scheduler<T> {
    tasks: HashMap<T, Entry>,
    next_seq: u64,
}

impl<T> Scheduler<T>
where
    T: Copy + Eq + Hash + Debug,
{
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            next_seq: 0,
        }
    }

    /// 登记周期任务（已存在则替换并重新计时）
    pub fn schedule_periodic(&mut self, task: T, interval: Duration, now: Instant) {
        let interval = interval.max(Duration::from_millis(1));
        let seq = self.bump_seq();
        self.tasks.insert(
            task,
            Entry {
                kind: TaskKind::Periodic(interval),
                deadline: now + interval,
                seq,
            },
        );
    }

    /// 登记单次任务（已存在则重新计时）
    pub fn schedule_once(&mut self, task: T, delay: Duration, now: Instant) {
        let seq = self.bump_seq();
        self.tasks.insert(
            task,
            Entry {
                kind: TaskKind::Once,
                deadline: now + delay,
                seq,
            },
        );
    }

    /// 取消任务，返回任务此前是否存在
    pub fn cancel(&mut self, task: T) -> bool {
        self.tasks.remove(&task).is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.values().map(|e| e.deadline).min()
    }

    /// 取出最早到期的任务
    ///
    /// 单次任务取出即移除；周期任务顺延一个周期（落后太多时从 `now` 重新计时，不补跑）。
    pub fn pop_due(&mut self, now: Instant) -> Option<T> {
        let (task, entry) = self
            .tasks
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .min_by_key(|(_, e)| (e.deadline, e.seq))
            .map(|(t, e)| (*t, *e))?;

        match entry.kind {
            TaskKind::Once => {
                self.tasks.remove(&task);
            }
            TaskKind::Periodic(interval) => {
                let mut next = entry.deadline + interval;
                if next <= now {
                    next = now + interval;
                }
                if let Some(e) = self.tasks.get_mut(&task) {
                    e.deadline = next;
                }
            }
        }

        Some(task)
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

impl<T> Default for Scheduler<T>
where
    T: Copy + Eq + Hash + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}
