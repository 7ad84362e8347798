use std::sync::Mutex;
use std::sync::MutexGuard;

pub fn mutex_lock_or_recover<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        eprintln!("Warning: recovering from poisoned mutex");
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_uncontended() {
        let m = Mutex::new(7);
        assert_eq!(*mutex_lock_or_recover(&m), 7);
    }

    #[test]
    fn test_lock_recovers_after_poison() {
        let m = std::sync::Arc::new(Mutex::new(0));
        let m2 = m.clone();
        let _ = std::thread::spawn(move || {
            let _guard = m2.lock().unwrap();
            panic!("poison the mutex");
        })
        .join();

        let mut guard = mutex_lock_or_recover(&m);
        *guard = 1;
        assert_eq!(*guard, 1);
    }
}
