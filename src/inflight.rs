use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Debug, Clone, Default)]
pub struct InFlight {
    slots: Slots,
}

pub struct InFlightGuard {
    key: String,
    slots: Slots,
    permit: Option<OwnedMutexGuard<()>>,
}

impl InFlight {
    pub async fn acquire(&self, key: &str) -> InFlightGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries only the map still holds were left by cancelled waiters.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            Arc::clone(slots.entry(key.to_string()).or_default())
        };

        InFlightGuard {
            key: key.to_string(),
            slots: Arc::clone(&self.slots),
            permit: Some(slot.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        drop(self.permit.take());

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.key);
        }
    }
}
