//! 锁注册表实现

use core::fmt::Write as _;
use std::backtrace::Backtrace;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use hashbrown::{HashMap, HashSet};
use log::{debug, error, warn};
use parking_lot::Mutex;

use super::graph::OrderGraph;
use super::{HazardKind, LockId, LockOrderHazard, LockdepConfig};
use crate::config::LOCKDEP_TARGET;

struct Slot {
    name: String,
    /// 该名字当前的注册次数
    refs: usize,
}

struct HeldLock {
    id: LockId,
    bt: Option<Arc<Backtrace>>,
}

/// 待输出的隐患报告。在注册表内部锁释放后才写日志。
struct Report {
    hazard: LockOrderHazard,
    detail: String,
    /// 触发报告的新边，如 `b -> a`
    attempt: String,
}

#[derive(Default)]
struct RegistryState {
    names: HashMap<String, LockId>,
    slots: Vec<Option<Slot>>,
    graph: OrderGraph,
    held: HashMap<ThreadId, Vec<HeldLock>>,
    /// 已报告过的环（规范化后的锁 id 序列）
    reported: HashSet<Vec<LockId>>,
    hazards: Vec<LockOrderHazard>,
}

impl RegistryState {
    fn name(&self, id: LockId) -> &str {
        match self.slots.get(id.index()) {
            Some(Some(slot)) => &slot.name,
            _ => "<unregistered>",
        }
    }

    fn held_ids(&self, tid: ThreadId) -> Vec<LockId> {
        self.held
            .get(&tid)
            .map(|list| list.iter().map(|h| h.id).collect())
            .unwrap_or_default()
    }

    fn held_backtrace(&self, tid: ThreadId, id: LockId) -> Option<&Backtrace> {
        self.held
            .get(&tid)?
            .iter()
            .rev()
            .find(|h| h.id == id)?
            .bt
            .as_deref()
    }
}

/// 把环旋转到以最小 id 开头，使同一个环的不同观察得到同一个形状
fn canonical_cycle(cycle: &[LockId]) -> Vec<LockId> {
    let start = cycle
        .iter()
        .enumerate()
        .min_by_key(|&(_, id)| *id)
        .map_or(0, |(i, _)| i);
    cycle[start..].iter().chain(&cycle[..start]).copied().collect()
}

/// 锁注册表：记录锁名到 [`LockId`] 的映射和观察到的加锁顺序。
///
/// 所有状态由一把内部互斥锁保护，注册表本身不参与锁序检测。
pub struct LockRegistry {
    config: LockdepConfig,
    state: Mutex<RegistryState>,
}

impl LockRegistry {
    /// 按给定配置创建注册表
    pub fn new(config: LockdepConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// 注册表配置
    pub fn config(&self) -> &LockdepConfig {
        &self.config
    }

    /// 注册锁名，返回其标识。
    ///
    /// 已注册的名字返回原有标识并增加注册次数；每次注册都应当对应一次
    /// [`unregister`](Self::unregister)。
    ///
    /// # Panics
    /// 不同锁名的数量超过 [`LockdepConfig::max_locks`] 时 panic。
    pub fn register(&self, name: &str) -> LockId {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        if let Some(&id) = st.names.get(name) {
            if let Some(Some(slot)) = st.slots.get_mut(id.index()) {
                slot.refs += 1;
            }
            return id;
        }

        let index = match st.slots.iter().position(Option::is_none) {
            Some(index) => index,
            None => {
                assert!(
                    st.slots.len() < self.config.max_locks,
                    "lockdep: too many lock names (max {}), cannot register `{name}`",
                    self.config.max_locks
                );
                st.slots.push(None);
                st.slots.len() - 1
            }
        };
        let id = LockId::new(index);
        st.slots[index] = Some(Slot {
            name: name.into(),
            refs: 1,
        });
        st.names.insert(name.into(), id);
        drop(guard);

        debug!(target: LOCKDEP_TARGET, "register {name} -> {id}");
        id
    }

    /// 注销一次注册。注册次数归零时释放标识，并忘记与之相关的全部先后关系。
    pub fn unregister(&self, id: LockId) {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let Some(Some(slot)) = st.slots.get_mut(id.index()) else {
            drop(guard);
            warn!(target: LOCKDEP_TARGET, "unregister of unknown lock {id}");
            return;
        };
        slot.refs -= 1;
        if slot.refs > 0 {
            return;
        }

        let name = slot.name.clone();
        st.slots[id.index()] = None;
        st.names.remove(&name);
        st.graph.remove_lock(id);
        st.reported.retain(|shape| !shape.contains(&id));
        for list in st.held.values_mut() {
            list.retain(|h| h.id != id);
        }
        st.held.retain(|_, list| !list.is_empty());
        drop(guard);

        debug!(target: LOCKDEP_TARGET, "unregister {name} ({id})");
    }

    /// 按名字查找标识
    pub fn lookup(&self, name: &str) -> Option<LockId> {
        self.state.lock().names.get(name).copied()
    }

    /// 按标识查找名字
    pub fn name_of(&self, id: LockId) -> Option<String> {
        match self.state.lock().slots.get(id.index()) {
            Some(Some(slot)) => Some(slot.name.clone()),
            _ => None,
        }
    }

    /// 已注册的不同锁名数量
    pub fn len(&self) -> usize {
        self.state.lock().names.len()
    }

    /// 是否没有任何已注册的锁名
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前线程即将（可能阻塞地）获取 `id`。
    ///
    /// 对当前线程持有的每一把锁 `p`，若 `p -> id` 是新的先后关系且 `id` 已能到达 `p`，
    /// 报告一个环；否则立即提交 `p -> id`。边在阻塞之前提交，两个线程各持一把锁
    /// 再互相等待时，后进入注册表的一方就能看到先到一方的边。
    /// `recursive` 为真时，同一线程再次获取同一类锁不视为隐患。
    pub fn will_lock(&self, id: LockId, recursive: bool, backtrace: bool) {
        let me = thread::current().id();
        let current = (backtrace || self.config.force_backtrace)
            .then(|| Arc::new(Backtrace::force_capture()));
        let mut reports = Vec::new();

        {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            for p in st.held_ids(me) {
                if p == id {
                    if !recursive && st.reported.insert(vec![id]) {
                        let hazard = LockOrderHazard {
                            kind: HazardKind::Recursive,
                            locks: vec![st.name(id).into()],
                        };
                        st.hazards.push(hazard.clone());
                        let mut detail = String::new();
                        if let Some(bt) = st.held_backtrace(me, id) {
                            let _ = write!(detail, "\npreviously locked at:\n{bt}");
                        }
                        let attempt = format!("{0} -> {0}", st.name(id));
                        reports.push(Report {
                            hazard,
                            detail,
                            attempt,
                        });
                    }
                    continue;
                }
                if st.graph.contains(p, id) {
                    continue;
                }
                let Some(path) = st.graph.path(id, p) else {
                    st.graph.insert(p, id, current.clone());
                    continue;
                };

                // path = [id, .., p]，加上 p -> id 即构成环
                let mut cycle = Vec::with_capacity(path.len());
                cycle.push(p);
                cycle.extend_from_slice(&path[..path.len() - 1]);
                if !st.reported.insert(canonical_cycle(&cycle)) {
                    continue;
                }

                let hazard = LockOrderHazard {
                    kind: HazardKind::Cycle,
                    locks: cycle.iter().map(|&l| st.name(l).to_owned()).collect(),
                };
                st.hazards.push(hazard.clone());

                let mut detail = String::new();
                if let Some(bt) = st.held_backtrace(me, p) {
                    let _ = write!(detail, "\n{} locked at:\n{bt}", st.name(p));
                }
                for pair in path.windows(2) {
                    if let Some(bt) = st.graph.backtrace(pair[0], pair[1]) {
                        let _ = write!(
                            detail,
                            "\nprevious dependency {} -> {} established at:\n{bt}",
                            st.name(pair[0]),
                            st.name(pair[1])
                        );
                    }
                }
                let attempt = format!("{} -> {}", st.name(p), st.name(id));
                reports.push(Report {
                    hazard,
                    detail,
                    attempt,
                });
            }
        }

        if reports.is_empty() {
            return;
        }
        for report in &reports {
            error!(target: LOCKDEP_TARGET, "{}{}", report.hazard, report.detail);
            if let Some(bt) = &current {
                error!(
                    target: LOCKDEP_TARGET,
                    "new dependency {} attempted at:\n{bt}", report.attempt
                );
            }
        }
        if self.config.abort_on_hazard {
            panic!("lockdep: {}", reports[0].hazard);
        }
    }

    /// 当前线程刚刚获取了 `id`。
    ///
    /// 把 `id` 记入当前线程的持有列表。经 [`will_lock`](Self::will_lock) 的加锁
    /// 已经提交过先后关系；`try_lock` 不经过它，这里补交其中不会闭合环路的边。
    pub fn locked(&self, id: LockId, backtrace: bool) {
        let me = thread::current().id();
        let bt = (backtrace || self.config.force_backtrace)
            .then(|| Arc::new(Backtrace::force_capture()));

        let mut guard = self.state.lock();
        let st = &mut *guard;
        for p in st.held_ids(me) {
            if p == id || st.graph.contains(p, id) || st.graph.path(id, p).is_some() {
                continue;
            }
            st.graph.insert(p, id, bt.clone());
        }
        st.held.entry(me).or_default().push(HeldLock { id, bt });
    }

    /// 当前线程即将释放 `id`
    pub fn will_unlock(&self, id: LockId) {
        let me = thread::current().id();
        let mut guard = self.state.lock();
        let st = &mut *guard;

        let mut removed = false;
        if let Some(list) = st.held.get_mut(&me) {
            if let Some(pos) = list.iter().rposition(|h| h.id == id) {
                list.remove(pos);
                removed = true;
            }
            if list.is_empty() {
                st.held.remove(&me);
            }
        }
        if !removed {
            let name = st.name(id).to_owned();
            drop(guard);
            warn!(
                target: LOCKDEP_TARGET,
                "unlocking {name} ({id}) which this thread does not hold"
            );
        }
    }

    /// 是否已记录 `before -> after` 的先后关系
    pub fn ordered_before(&self, before: LockId, after: LockId) -> bool {
        self.state.lock().graph.contains(before, after)
    }

    /// 已记录的先后关系数量
    pub fn edge_count(&self) -> usize {
        self.state.lock().graph.edge_count()
    }

    /// 当前线程持有的锁，按获取顺序排列
    pub fn held_by_current_thread(&self) -> Vec<LockId> {
        self.state.lock().held_ids(thread::current().id())
    }

    /// 迄今报告过的全部隐患
    pub fn hazards(&self) -> Vec<LockOrderHazard> {
        self.state.lock().hazards.clone()
    }

    /// 迄今报告过的隐患数量
    pub fn hazard_count(&self) -> usize {
        self.state.lock().hazards.len()
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new(LockdepConfig::default())
    }
}
