//! Scoped temporary register allocation

use tern_vm_bytecode::{Register, RegisterList};

/// Notified of every allocation and release made by a [`RegisterAllocator`]
pub trait RegisterAllocationObserver {
    /// A single register was allocated
    fn register_allocated(&mut self, register: Register);

    /// A contiguous list was allocated
    fn register_list_allocated(&mut self, list: RegisterList);

    /// Every register with index `>= first_free` was released
    fn registers_released(&mut self, first_free: i32);
}

impl RegisterAllocationObserver for () {
    fn register_allocated(&mut self, _register: Register) {}
    fn register_list_allocated(&mut self, _list: RegisterList) {}
    fn registers_released(&mut self, _first_free: i32) {}
}

/// Bump allocator over the temporary registers of one frame.
///
/// Temporaries start after the locals and the context-save registers. The
/// cursor only moves back through [`release`](Self::release), which gives
/// the LIFO discipline of nested register scopes:
///
/// ```text
/// let checkpoint = registers.position();
/// let tmp = registers.new_register();
/// ...
/// registers.release(checkpoint);
/// ```
#[derive(Debug)]
pub struct RegisterAllocator<O: RegisterAllocationObserver = ()> {
    /// First temporary register
    first_temporary: i32,
    /// Next available register
    next: i32,
    /// Maximum register count reached
    max: i32,
    observer: O,
}

impl RegisterAllocator {
    /// Allocator without an observer
    pub fn new(first_temporary: u32) -> Self {
        Self::with_observer(first_temporary, ())
    }
}

impl<O: RegisterAllocationObserver> RegisterAllocator<O> {
    /// Allocator reporting to `observer`
    pub fn with_observer(first_temporary: u32, observer: O) -> Self {
        let first_temporary = first_temporary as i32;
        Self {
            first_temporary,
            next: first_temporary,
            max: first_temporary,
            observer,
        }
    }

    /// Allocate a register
    pub fn new_register(&mut self) -> Register {
        let register = Register(self.next);
        self.bump(1);
        self.observer.register_allocated(register);
        register
    }

    /// Allocate `count` contiguous registers
    pub fn new_register_list(&mut self, count: u32) -> RegisterList {
        let list = RegisterList::new(Register(self.next), count);
        self.bump(count as i32);
        self.observer.register_list_allocated(list);
        list
    }

    /// Grow a list allocated last by one register
    pub fn grow_register_list(&mut self, list: RegisterList) -> RegisterList {
        assert_eq!(
            list.first().index() + list.count() as i32,
            self.next,
            "only the most recent allocation can grow"
        );
        let register = self.new_register();
        debug_assert_eq!(register.index(), list.first().index() + list.count() as i32);
        RegisterList::new(list.first(), list.count() + 1)
    }

    fn bump(&mut self, count: i32) {
        self.next += count;
        self.max = self.max.max(self.next);
    }

    /// Current cursor, for restoring later
    #[inline]
    pub fn position(&self) -> i32 {
        self.next
    }

    /// Release every register allocated since `checkpoint`
    pub fn release(&mut self, checkpoint: i32) {
        assert!(
            checkpoint >= self.first_temporary && checkpoint <= self.next,
            "register release out of order: checkpoint {} with cursor {}",
            checkpoint,
            self.next
        );
        self.next = checkpoint;
        self.observer.registers_released(checkpoint);
    }

    /// Whether `register` is a live temporary
    pub fn is_live_temporary(&self, register: Register) -> bool {
        register.index() >= self.first_temporary && register.index() < self.next
    }

    /// First temporary register index
    #[inline]
    pub fn first_temporary(&self) -> i32 {
        self.first_temporary
    }

    /// High-water mark: registers the frame needs
    #[inline]
    pub fn maximum_register_count(&self) -> u32 {
        self.max as u32
    }

    /// The observer
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// The observer, mutably
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl RegisterAllocationObserver for Recorder {
        fn register_allocated(&mut self, register: Register) {
            self.events.push(format!("alloc {}", register));
        }
        fn register_list_allocated(&mut self, list: RegisterList) {
            self.events.push(format!("list {}x{}", list.first(), list.count()));
        }
        fn registers_released(&mut self, first_free: i32) {
            self.events.push(format!("release {}", first_free));
        }
    }

    #[test]
    fn test_register_allocator() {
        let mut alloc = RegisterAllocator::new(2);

        let r2 = alloc.new_register();
        let r3 = alloc.new_register();
        assert_eq!(r2, Register(2));
        assert_eq!(r3, Register(3));
        assert_eq!(alloc.maximum_register_count(), 4);

        alloc.release(3);
        let again = alloc.new_register();
        assert_eq!(again, Register(3)); // Reuses released register
        assert_eq!(alloc.maximum_register_count(), 4);
    }

    #[test]
    fn test_register_list_and_grow() {
        let mut alloc = RegisterAllocator::new(0);
        let list = alloc.new_register_list(2);
        assert_eq!(list.first(), Register(0));
        let grown = alloc.grow_register_list(list);
        assert_eq!(grown.count(), 3);
        assert_eq!(alloc.position(), 3);

        let empty = alloc.new_register_list(0);
        assert_eq!(empty.first(), Register(3));
        assert_eq!(alloc.position(), 3);
    }

    #[test]
    fn test_observer_sees_every_event() {
        let mut alloc = RegisterAllocator::with_observer(1, Recorder::default());
        let checkpoint = alloc.position();
        alloc.new_register();
        alloc.new_register_list(2);
        alloc.release(checkpoint);
        assert_eq!(
            alloc.observer().events,
            vec!["alloc r1", "list r2x2", "release 1"]
        );
    }

    #[test]
    #[should_panic(expected = "release out of order")]
    fn test_release_past_cursor_panics() {
        let mut alloc = RegisterAllocator::new(0);
        alloc.release(1);
    }

    proptest! {
        #[test]
        fn test_release_restores_checkpoint(ops in proptest::collection::vec(0u32..4, 1..40)) {
            let mut alloc = RegisterAllocator::new(3);
            let mut checkpoints = Vec::new();
            let mut high_water = alloc.maximum_register_count();
            for op in ops {
                match op {
                    0 => checkpoints.push(alloc.position()),
                    1 => { alloc.new_register(); }
                    2 => { alloc.new_register_list(3); }
                    _ => {
                        if let Some(checkpoint) = checkpoints.pop() {
                            alloc.release(checkpoint);
                            prop_assert_eq!(alloc.position(), checkpoint);
                        }
                    }
                }
                prop_assert!(alloc.maximum_register_count() >= high_water);
                high_water = alloc.maximum_register_count();
            }
        }
    }
}
