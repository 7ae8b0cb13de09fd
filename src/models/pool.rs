use crate::utils::error::RetinaError;
use crate::Result;
use parking_lot::{Condvar, Mutex};

/// 固定容量的对象池：调用方独占借出一个对象，用完自动归还
pub struct SessionPool<T> {
    idle: Mutex<Vec<T>>,
    available: Condvar,
    capacity: usize,
}

impl<T> SessionPool<T> {
    pub fn new(items: Vec<T>) -> Result<Self> {
        if items.is_empty() {
            return Err(RetinaError::Config(
                "Session pool needs at least one session".to_string(),
            ));
        }
        Ok(Self {
            capacity: items.len(),
            idle: Mutex::new(items),
            available: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// 借出一个对象执行 `f`；池空时阻塞等待归还。`f` panic 时对象同样归还
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut checkout = Checkout {
            pool: self,
            item: None,
        };
        let item = checkout.item.insert(self.acquire());
        f(item)
    }

    fn acquire(&self) -> T {
        let mut idle = self.idle.lock();
        loop {
            if let Some(item) = idle.pop() {
                return item;
            }
            tracing::trace!("All {} sessions busy, waiting", self.capacity);
            self.available.wait(&mut idle);
        }
    }

    fn release(&self, item: T) {
        self.idle.lock().push(item);
        self.available.notify_one();
    }
}

struct Checkout<'a, T> {
    pool: &'a SessionPool<T>,
    item: Option<T>,
}

impl<T> Drop for Checkout<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}
