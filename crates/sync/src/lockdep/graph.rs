//! 锁先后关系图

use std::backtrace::Backtrace;
use std::collections::VecDeque;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use super::LockId;

/// 有向图，边 `a -> b` 表示曾观察到持有 `a` 时获取 `b`。
///
/// 图始终保持无环：会闭合环路的边由调用方拒绝插入。
#[derive(Default)]
pub(super) struct OrderGraph {
    edges: HashMap<LockId, HashMap<LockId, Option<Arc<Backtrace>>>>,
}

impl OrderGraph {
    pub(super) fn contains(&self, from: LockId, to: LockId) -> bool {
        self.edges
            .get(&from)
            .is_some_and(|succ| succ.contains_key(&to))
    }

    pub(super) fn insert(&mut self, from: LockId, to: LockId, bt: Option<Arc<Backtrace>>) {
        self.edges.entry(from).or_default().insert(to, bt);
    }

    /// 获取边 `from -> to` 建立时记录的调用栈
    pub(super) fn backtrace(&self, from: LockId, to: LockId) -> Option<&Backtrace> {
        self.edges.get(&from)?.get(&to)?.as_deref()
    }

    /// 广度优先搜索 `from` 到 `to` 的一条最短路径，返回的路径包含两端点
    pub(super) fn path(&self, from: LockId, to: LockId) -> Option<Vec<LockId>> {
        if from == to {
            return Some(vec![from]);
        }
        let mut parent: HashMap<LockId, LockId> = HashMap::new();
        let mut visited: HashSet<LockId> = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(from);
        queue.push_back(from);

        while let Some(cur) = queue.pop_front() {
            let Some(succ) = self.edges.get(&cur) else {
                continue;
            };
            for &next in succ.keys() {
                if !visited.insert(next) {
                    continue;
                }
                parent.insert(next, cur);
                if next == to {
                    let mut path = vec![to];
                    let mut node = to;
                    while let Some(&p) = parent.get(&node) {
                        path.push(p);
                        node = p;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }

    /// 删除与 `id` 相关的所有边
    pub(super) fn remove_lock(&mut self, id: LockId) {
        self.edges.remove(&id);
        for succ in self.edges.values_mut() {
            succ.remove(&id);
        }
        self.edges.retain(|_, succ| !succ.is_empty());
    }

    /// 边的总数
    pub(super) fn edge_count(&self) -> usize {
        self.edges.values().map(HashMap::len).sum()
    }
}
