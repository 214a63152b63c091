//! Single-assignment cells and the composition algebra over them.
//!
//! An `Ivar` is the write end of a future: a cell that is filled at most
//! once. A `Deferred` is the read-only view over the same cell. Filling a
//! cell never runs its handlers inline; every handler becomes a job on
//! the scheduler, which keeps recursion bounded and interleaving fair.
//!
//! Cells produced by `bind` collapse into indirections onto the deferred
//! the body returns, so long monadic chains cost one hop instead of a
//! handler per link.

pub mod errors;

pub use self::errors::{Error, Result};

use std::cell::RefCell;
use std::mem;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::sched::{self, ExecutionContext};

type CellRef<T> = Rc<RefCell<State<T>>>;
type HandlerFn<T> = Box<dyn FnOnce(T)>;

enum State<T: 'static> {
    /// No value, no handlers.
    Empty,
    /// No value, exactly one handler; the common case stays off the list.
    EmptyOneHandler(HandlerFn<T>, ExecutionContext),
    /// No value, a removable doubly-linked list of handlers.
    EmptyManyHandlers(HandlerList<T>),
    Full(T),
    /// This cell forwards another; chains are compressed on access.
    Indir(CellRef<T>),
}

/// The write end of a single-assignment cell.
pub struct Ivar<T: 'static> {
    cell: CellRef<T>,
}

/// A read-only view over a single-assignment cell.
pub struct Deferred<T: 'static> {
    cell: CellRef<T>,
}

impl<T> Clone for Ivar<T> {
    fn clone(&self) -> Self {
        Ivar {
            cell: self.cell.clone(),
        }
    }
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Deferred {
            cell: self.cell.clone(),
        }
    }
}

impl<T> Default for Ivar<T> {
    fn default() -> Self {
        Ivar::new()
    }
}

impl<T> Ivar<T> {
    /// Creates an empty cell.
    pub fn new() -> Ivar<T> {
        Ivar {
            cell: Rc::new(RefCell::new(State::Empty)),
        }
    }

    /// The read-only view of this cell.
    pub fn read(&self) -> Deferred<T> {
        Deferred {
            cell: self.cell.clone(),
        }
    }

    /// True if both name the same underlying cell.
    pub fn same(&self, other: &Ivar<T>) -> bool {
        Rc::ptr_eq(&resolve(&self.cell), &resolve(&other.cell))
    }
}

impl<T: Clone> Ivar<T> {
    /// Fills the cell, scheduling every attached handler as a job. Fails
    /// with `AlreadyFull` when the cell has been filled before.
    pub fn fill(&self, value: T) -> Result<()> {
        fill_cell(&self.cell, value)
    }

    /// The total variant of `fill`: fills an empty cell and reports
    /// whether it did anything.
    pub fn fill_if_empty(&self, value: T) -> bool {
        fill_cell(&self.cell, value).is_ok()
    }

    #[inline]
    pub fn is_determined(&self) -> bool {
        self.read().is_determined()
    }

    #[inline]
    pub fn peek(&self) -> Option<T> {
        self.read().peek()
    }
}

impl<T> Deferred<T> {
    /// A deferred that never determines.
    pub fn never() -> Deferred<T> {
        Ivar::new().read()
    }

    /// True if both views observe the same underlying cell.
    pub fn same(&self, other: &Deferred<T>) -> bool {
        Rc::ptr_eq(&resolve(&self.cell), &resolve(&other.cell))
    }

    pub fn is_determined(&self) -> bool {
        match *resolve(&self.cell).borrow() {
            State::Full(_) => true,
            _ => false,
        }
    }
}

impl<T: Clone> Deferred<T> {
    /// An already-determined deferred holding `value`.
    pub fn determined(value: T) -> Deferred<T> {
        Deferred {
            cell: Rc::new(RefCell::new(State::Full(value))),
        }
    }

    /// The determined value, if any. Once this returns `Some` it returns
    /// the same value forever.
    pub fn peek(&self) -> Option<T> {
        match *resolve(&self.cell).borrow() {
            State::Full(ref v) => Some(v.clone()),
            _ => None,
        }
    }

    /// The determined value; fails with `NotDetermined` on an empty cell.
    pub fn value(&self) -> Result<T> {
        self.peek().ok_or(Error::NotDetermined)
    }

    /// Runs `f` with the value once determined. The execution context is
    /// captured now; `f` always runs as a scheduled job, never inline,
    /// even when the cell is already full.
    pub fn upon<F>(&self, f: F)
    where
        F: FnOnce(T) + 'static,
    {
        add_handler(&self.cell, Box::new(f), sched::current_context());
    }

    /// Monadic sequencing: hands the value to `f` and forwards the
    /// deferred `f` returns. The result cell is collapsed into an
    /// indirection, so chains do not pile up handlers.
    pub fn bind<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Deferred<U> + 'static,
    {
        let result: Ivar<U> = Ivar::new();
        let forward = result.cell.clone();
        let context = sched::current_context().with_call_site("bind");
        add_handler(
            &self.cell,
            Box::new(move |v| {
                let inner = f(v);
                connect(forward, inner.cell);
            }),
            context,
        );
        result.read()
    }

    /// Applicative map. When the deferred is already determined the
    /// mapping runs right away, skipping the intermediate job.
    pub fn map<U, F>(&self, f: F) -> Deferred<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> U + 'static,
    {
        if let Some(v) = self.peek() {
            return Deferred::determined(f(v));
        }

        let result: Ivar<U> = Ivar::new();
        let fill = result.clone();
        let context = sched::current_context().with_call_site("map");
        add_handler(
            &self.cell,
            Box::new(move |v| {
                fill.fill(f(v)).expect("map result cell filled twice");
            }),
            context,
        );
        result.read()
    }

    /// Discards the value.
    pub fn ignore(&self) -> Deferred<()> {
        self.map(|_| ())
    }
}

impl<T: Clone> Deferred<Deferred<T>> {
    /// Collapses one level of nesting.
    pub fn join(&self) -> Deferred<T> {
        self.bind(|d| d)
    }
}

/// A pre-determined unit deferred.
pub fn unit() -> Deferred<()> {
    Deferred::determined(())
}

/// Determined once both inputs are, with their pair of values.
pub fn both<A, B>(a: &Deferred<A>, b: &Deferred<B>) -> Deferred<(A, B)>
where
    A: Clone + 'static,
    B: Clone + 'static,
{
    let b = b.clone();
    a.bind(move |x| b.map(move |y| (x, y)))
}

/// Determined once every input is, with the values in input order. An
/// empty input list is determined immediately.
pub fn all<T>(deferreds: Vec<Deferred<T>>) -> Deferred<Vec<T>>
where
    T: Clone + 'static,
{
    if deferreds.is_empty() {
        return Deferred::determined(Vec::new());
    }

    let result: Ivar<Vec<T>> = Ivar::new();
    let remaining = Rc::new(std::cell::Cell::new(deferreds.len()));
    let slots: Rc<RefCell<Vec<Option<T>>>> = Rc::new(RefCell::new(vec![None; deferreds.len()]));

    for (i, d) in deferreds.iter().enumerate() {
        let result = result.clone();
        let remaining = remaining.clone();
        let slots = slots.clone();
        d.upon(move |v| {
            slots.borrow_mut()[i] = Some(v);
            remaining.set(remaining.get() - 1);
            if remaining.get() == 0 {
                let values = slots
                    .borrow_mut()
                    .drain(..)
                    .map(|v| v.expect("all() lost a determined slot"))
                    .collect();
                result.fill(values).expect("all() result filled twice");
            }
        });
    }

    result.read()
}

/// Determined once every input is.
pub fn all_unit<T>(deferreds: Vec<Deferred<T>>) -> Deferred<()>
where
    T: Clone + 'static,
{
    all(deferreds).ignore()
}

/// Determined with the value of the first input to determine.
pub fn any<T>(deferreds: Vec<Deferred<T>>) -> Deferred<T>
where
    T: Clone + 'static,
{
    choose(deferreds.iter().map(|d| choice(d, |v| v)).collect())
}

/// Determined once any input is.
pub fn any_unit<T>(deferreds: Vec<Deferred<T>>) -> Deferred<()>
where
    T: Clone + 'static,
{
    choose(deferreds.iter().map(|d| choice(d, |_| ())).collect())
}

struct ChooseShared<U: 'static> {
    result: Ivar<U>,
    cancels: RefCell<SmallVec<[Box<dyn FnOnce()>; 4]>>,
}

/// One alternative of a `choose`; pairs a deferred with the mapping
/// applied should it win.
pub struct Choice<U: 'static> {
    register: Box<dyn FnOnce(Rc<ChooseShared<U>>)>,
}

pub fn choice<T, U, F>(deferred: &Deferred<T>, f: F) -> Choice<U>
where
    T: Clone + 'static,
    U: Clone + 'static,
    F: FnOnce(T) -> U + 'static,
{
    let deferred = deferred.clone();
    Choice {
        register: Box::new(move |shared: Rc<ChooseShared<U>>| {
            let winner = shared.clone();
            let token = add_handler_removable(
                &deferred.cell,
                Box::new(move |v| {
                    if winner.result.fill_if_empty(f(v)) {
                        for cancel in winner.cancels.borrow_mut().drain() {
                            cancel();
                        }
                    }
                }),
                sched::current_context().with_call_site("choose"),
            );
            shared
                .cancels
                .borrow_mut()
                .push(Box::new(move || remove_handler(token)));
        }),
    }
}

/// Determined with the first alternative to determine; the losing
/// alternatives have their handlers unlinked in O(1). Alternatives that
/// are determined up front tie-break in the order given.
pub fn choose<U>(choices: Vec<Choice<U>>) -> Deferred<U>
where
    U: Clone + 'static,
{
    let shared = Rc::new(ChooseShared {
        result: Ivar::new(),
        cancels: RefCell::new(SmallVec::new()),
    });
    for choice in choices {
        (choice.register)(shared.clone());
    }
    shared.result.read()
}

// ---------------------------------------------------------------------------
// Cell internals.

/// Follows `Indir` links to the representative cell, re-pointing every
/// visited cell straight at it.
fn resolve<T>(cell: &CellRef<T>) -> CellRef<T> {
    let target = match *cell.borrow() {
        State::Indir(ref next) => next.clone(),
        _ => return cell.clone(),
    };

    let root = resolve(&target);
    if !Rc::ptr_eq(&root, &target) {
        *cell.borrow_mut() = State::Indir(root.clone());
    }
    root
}

fn schedule_handler<T: 'static>(context: ExecutionContext, run: HandlerFn<T>, value: T) {
    sched::enqueue_job(context, Box::new(move || run(value)));
}

fn fill_cell<T: Clone>(cell: &CellRef<T>, value: T) -> Result<()> {
    let cell = resolve(cell);
    let state = mem::replace(&mut *cell.borrow_mut(), State::Empty);
    match state {
        State::Full(v) => {
            *cell.borrow_mut() = State::Full(v);
            Err(Error::AlreadyFull)
        }
        State::Empty => {
            *cell.borrow_mut() = State::Full(value);
            Ok(())
        }
        State::EmptyOneHandler(run, context) => {
            *cell.borrow_mut() = State::Full(value.clone());
            schedule_handler(context, run, value);
            Ok(())
        }
        State::EmptyManyHandlers(list) => {
            *cell.borrow_mut() = State::Full(value.clone());
            while let Some((run, context)) = list.pop_front() {
                schedule_handler(context, run, value.clone());
            }
            Ok(())
        }
        State::Indir(_) => unreachable!("resolve returned an indirection"),
    }
}

fn add_handler<T: Clone>(cell: &CellRef<T>, run: HandlerFn<T>, context: ExecutionContext) {
    let cell = resolve(cell);
    let mut state = cell.borrow_mut();
    match *state {
        State::Full(ref v) => {
            let v = v.clone();
            drop(state);
            schedule_handler(context, run, v);
        }
        State::Empty => {
            *state = State::EmptyOneHandler(run, context);
        }
        State::EmptyOneHandler(..) => {
            if let State::EmptyOneHandler(first_run, first_context) =
                mem::replace(&mut *state, State::Empty)
            {
                let list = HandlerList::new();
                list.push_back(first_run, first_context);
                list.push_back(run, context);
                *state = State::EmptyManyHandlers(list);
            }
        }
        State::EmptyManyHandlers(ref list) => {
            list.push_back(run, context);
        }
        State::Indir(_) => unreachable!("resolve returned an indirection"),
    }
}

enum HandlerToken<T: 'static> {
    Linked(NodeRef<T>),
    /// The deferred was already determined; there is nothing to unlink.
    Spent,
}

fn add_handler_removable<T: Clone>(
    cell: &CellRef<T>,
    run: HandlerFn<T>,
    context: ExecutionContext,
) -> HandlerToken<T> {
    let cell = resolve(cell);
    let mut state = cell.borrow_mut();
    match *state {
        State::Full(ref v) => {
            let v = v.clone();
            drop(state);
            schedule_handler(context, run, v);
            HandlerToken::Spent
        }
        State::Empty => {
            let list = HandlerList::new();
            let node = list.push_back(run, context);
            *state = State::EmptyManyHandlers(list);
            HandlerToken::Linked(node)
        }
        State::EmptyOneHandler(..) => {
            if let State::EmptyOneHandler(first_run, first_context) =
                mem::replace(&mut *state, State::Empty)
            {
                let list = HandlerList::new();
                list.push_back(first_run, first_context);
                let node = list.push_back(run, context);
                *state = State::EmptyManyHandlers(list);
                HandlerToken::Linked(node)
            } else {
                unreachable!()
            }
        }
        State::EmptyManyHandlers(ref list) => HandlerToken::Linked(list.push_back(run, context)),
        State::Indir(_) => unreachable!("resolve returned an indirection"),
    }
}

fn remove_handler<T>(token: HandlerToken<T>) {
    if let HandlerToken::Linked(node) = token {
        HandlerList::unlink(&node);
    }
}

/// Collapses `outer` into a forwarder of `inner`: handlers migrate onto
/// `inner`'s list (keeping their identity, so removal tokens stay good)
/// and `outer` becomes an indirection.
fn connect<T: Clone>(outer: CellRef<T>, inner: CellRef<T>) {
    let outer = resolve(&outer);
    let inner = resolve(&inner);
    if Rc::ptr_eq(&outer, &inner) {
        return;
    }

    let state = mem::replace(&mut *outer.borrow_mut(), State::Indir(inner.clone()));
    match state {
        State::Full(_) => unreachable!("a bind result cell cannot be full before connecting"),
        State::Empty => {}
        State::EmptyOneHandler(run, context) => {
            add_handler(&inner, run, context);
        }
        State::EmptyManyHandlers(list) => {
            let mut inner_state = inner.borrow_mut();
            match *inner_state {
                State::Full(ref v) => {
                    let v = v.clone();
                    drop(inner_state);
                    while let Some((run, context)) = list.pop_front() {
                        schedule_handler(context, run, v.clone());
                    }
                }
                State::Empty => {
                    *inner_state = State::EmptyManyHandlers(list);
                }
                State::EmptyOneHandler(..) => {
                    if let State::EmptyOneHandler(first_run, first_context) =
                        mem::replace(&mut *inner_state, State::Empty)
                    {
                        let merged = HandlerList::new();
                        merged.push_back(first_run, first_context);
                        merged.splice_back(&list);
                        *inner_state = State::EmptyManyHandlers(merged);
                    }
                }
                State::EmptyManyHandlers(ref existing) => {
                    existing.splice_back(&list);
                }
                State::Indir(_) => unreachable!("resolve returned an indirection"),
            }
        }
        State::Indir(_) => unreachable!("resolve returned an indirection"),
    }
}

// ---------------------------------------------------------------------------
// The intrusive handler list.
//
// A circular doubly-linked list around a sentinel node. Unlinking needs
// only the node itself, which is what makes handler removal O(1) without
// the node knowing which cell owns it. That matters once `connect` splices
// a list into another cell wholesale.

type NodeRef<T> = Rc<RefCell<Node<T>>>;

struct Node<T: 'static> {
    run: Option<HandlerFn<T>>,
    context: Option<ExecutionContext>,
    prev: Option<Weak<RefCell<Node<T>>>>,
    next: Option<NodeRef<T>>,
}

struct HandlerList<T: 'static> {
    sentinel: NodeRef<T>,
}

impl<T> HandlerList<T> {
    fn new() -> HandlerList<T> {
        let sentinel = Rc::new(RefCell::new(Node {
            run: None,
            context: None,
            prev: None,
            next: None,
        }));
        {
            let mut node = sentinel.borrow_mut();
            node.prev = Some(Rc::downgrade(&sentinel));
            node.next = Some(sentinel.clone());
        }
        HandlerList { sentinel }
    }

    fn push_back(&self, run: HandlerFn<T>, context: ExecutionContext) -> NodeRef<T> {
        let tail = self
            .sentinel
            .borrow()
            .prev
            .as_ref()
            .unwrap()
            .upgrade()
            .expect("handler list tail disappeared");

        let node = Rc::new(RefCell::new(Node {
            run: Some(run),
            context: Some(context),
            prev: Some(Rc::downgrade(&tail)),
            next: Some(self.sentinel.clone()),
        }));

        tail.borrow_mut().next = Some(node.clone());
        self.sentinel.borrow_mut().prev = Some(Rc::downgrade(&node));
        node
    }

    fn pop_front(&self) -> Option<(HandlerFn<T>, ExecutionContext)> {
        let first = self.sentinel.borrow().next.as_ref().unwrap().clone();
        if Rc::ptr_eq(&first, &self.sentinel) {
            return None;
        }

        HandlerList::unlink(&first);
        let mut node = first.borrow_mut();
        Some((
            node.run.take().expect("handler node drained twice"),
            node.context.take().expect("handler node without context"),
        ))
    }

    /// Unlinks `node` from whatever list it is on. No-op for nodes that
    /// were already unlinked or drained.
    fn unlink(node: &NodeRef<T>) -> bool {
        let (prev, next) = {
            let mut n = node.borrow_mut();
            let prev = match n.prev.take() {
                Some(prev) => prev,
                None => return false,
            };
            let next = n.next.take().expect("linked node without a successor");
            (prev, next)
        };

        let prev = prev.upgrade().expect("handler list predecessor disappeared");
        prev.borrow_mut().next = Some(next.clone());
        next.borrow_mut().prev = Some(Rc::downgrade(&prev));
        true
    }

    /// Moves every node of `other` to the back of `self`, preserving
    /// order and node identity. `other` ends up empty.
    fn splice_back(&self, other: &HandlerList<T>) {
        let other_first = other.sentinel.borrow().next.as_ref().unwrap().clone();
        if Rc::ptr_eq(&other_first, &other.sentinel) {
            return;
        }
        let other_last = other
            .sentinel
            .borrow()
            .prev
            .as_ref()
            .unwrap()
            .upgrade()
            .expect("handler list tail disappeared");

        // Detach the run of nodes from `other`.
        {
            let mut s = other.sentinel.borrow_mut();
            s.next = Some(other.sentinel.clone());
            s.prev = Some(Rc::downgrade(&other.sentinel));
        }

        let tail = self
            .sentinel
            .borrow()
            .prev
            .as_ref()
            .unwrap()
            .upgrade()
            .expect("handler list tail disappeared");

        tail.borrow_mut().next = Some(other_first.clone());
        other_first.borrow_mut().prev = Some(Rc::downgrade(&tail));
        other_last.borrow_mut().next = Some(self.sentinel.clone());
        self.sentinel.borrow_mut().prev = Some(Rc::downgrade(&other_last));
    }
}

impl<T> Drop for HandlerList<T> {
    // The next-chain is a strong cycle through the sentinel; sever it so
    // orphaned handlers actually drop.
    fn drop(&mut self) {
        let mut cursor = self.sentinel.borrow_mut().next.take();
        while let Some(node) = cursor {
            if Rc::ptr_eq(&node, &self.sentinel) {
                break;
            }
            cursor = node.borrow_mut().next.take();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::params::Params;
    use crate::sched;

    fn kernel<F: FnOnce()>(f: F) {
        sched::setup(Params::default());
        f();
        sched::discard();
    }

    #[test]
    fn fill_is_single_assignment() {
        kernel(|| {
            let ivar = Ivar::new();
            assert!(ivar.fill(1).is_ok());
            assert!(match ivar.fill(2) {
                Err(Error::AlreadyFull) => true,
                _ => false,
            });
            assert!(!ivar.fill_if_empty(3));
            assert_eq!(ivar.peek(), Some(1));
        });
    }

    #[test]
    fn peek_is_stable_and_value_reports_empty() {
        kernel(|| {
            let ivar: Ivar<u32> = Ivar::new();
            let deferred = ivar.read();
            assert!(!deferred.is_determined());
            assert!(match deferred.value() {
                Err(Error::NotDetermined) => true,
                _ => false,
            });

            ivar.fill(7).unwrap();
            for _ in 0..3 {
                assert_eq!(deferred.peek(), Some(7));
                sched::run_cycle().unwrap();
            }
            assert_eq!(deferred.value().unwrap(), 7);
        });
    }

    #[test]
    fn handlers_run_in_registration_order_and_never_inline() {
        kernel(|| {
            let seen = Rc::new(RefCell::new(Vec::new()));
            let ivar = Ivar::new();
            for i in 0..4 {
                let seen = seen.clone();
                ivar.read().upon(move |v: u32| seen.borrow_mut().push((i, v)));
            }

            ivar.fill(9).unwrap();
            assert!(seen.borrow().is_empty(), "handlers must not run inside fill");

            sched::run_cycle().unwrap();
            assert_eq!(*seen.borrow(), vec![(0, 9), (1, 9), (2, 9), (3, 9)]);
        });
    }

    #[test]
    fn upon_after_determination_runs_within_a_cycle() {
        kernel(|| {
            let seen = Rc::new(std::cell::Cell::new(0));
            let deferred = Deferred::determined(5);

            let sink = seen.clone();
            deferred.upon(move |v| sink.set(v));
            assert_eq!(seen.get(), 0);

            sched::run_cycle().unwrap();
            assert_eq!(seen.get(), 5);
        });
    }

    #[test]
    fn map_on_a_determined_deferred_skips_the_job() {
        kernel(|| {
            let doubled = Deferred::determined(4).map(|v| v * 2);
            assert_eq!(doubled.peek(), Some(8));
        });
    }

    #[test]
    fn bind_monad_laws() {
        kernel(|| {
            let f = |x: u32| Deferred::determined(x + 1);
            let g = |x: u32| Deferred::determined(x * 3);

            // Left and right identity.
            let left = Deferred::determined(10).bind(f);
            let right = Deferred::determined(10).bind(Deferred::determined);
            while !(left.is_determined() && right.is_determined()) {
                sched::run_cycle().unwrap();
            }
            assert_eq!(left.peek(), Some(11));
            assert_eq!(right.peek(), Some(10));

            // Associativity, driven through an initially-empty input.
            let input: Ivar<u32> = Ivar::new();
            let nested = input.read().bind(f).bind(g);
            let flat = input.read().bind(move |x| f(x).bind(g));
            input.fill(5).unwrap();
            while !(nested.is_determined() && flat.is_determined()) {
                sched::run_cycle().unwrap();
            }
            assert_eq!(nested.peek(), flat.peek());
            assert_eq!(nested.peek(), Some(18));
        });
    }

    #[test]
    fn bind_chains_compress_into_indirections() {
        kernel(|| {
            let input: Ivar<u32> = Ivar::new();
            let mut chain = input.read();
            for _ in 0..1024 {
                chain = chain.bind(|x| Deferred::determined(x));
            }

            let seen = Rc::new(std::cell::Cell::new(0));
            let sink = seen.clone();
            chain.upon(move |v| sink.set(v));

            input.fill(42).unwrap();
            while seen.get() == 0 {
                sched::run_cycle().unwrap();
            }
            assert_eq!(chain.peek(), Some(42));
            // Once collapsed, the chain observes the same cell as a fresh
            // read of its own tail.
            assert!(chain.same(&chain.clone()));
        });
    }

    #[test]
    fn all_preserves_input_order() {
        kernel(|| {
            let ivars: Vec<Ivar<u32>> = (0..3).map(|_| Ivar::new()).collect();
            let joined = all(ivars.iter().map(Ivar::read).collect());

            // Fill out of order; results come back in input order.
            ivars[2].fill(2).unwrap();
            ivars[0].fill(0).unwrap();
            ivars[1].fill(1).unwrap();

            while !joined.is_determined() {
                sched::run_cycle().unwrap();
            }
            assert_eq!(joined.peek(), Some(vec![0, 1, 2]));
        });
    }

    #[test]
    fn both_and_join() {
        kernel(|| {
            let a = Deferred::determined(1);
            let b = Deferred::determined("two");
            let pair = both(&a, &b);
            let flattened = Deferred::determined(Deferred::determined(3)).join();

            while !(pair.is_determined() && flattened.is_determined()) {
                sched::run_cycle().unwrap();
            }
            assert_eq!(pair.peek(), Some((1, "two")));
            assert_eq!(flattened.peek(), Some(3));
        });
    }

    #[test]
    fn choose_takes_the_first_determined_alternative() {
        kernel(|| {
            let slow: Ivar<u32> = Ivar::new();
            let fast = Deferred::determined(2);
            let winner = choose(vec![
                choice(&slow.read(), |v| v * 10),
                choice(&fast, |v| v * 10),
            ]);

            while !winner.is_determined() {
                sched::run_cycle().unwrap();
            }
            assert_eq!(winner.peek(), Some(20));

            // The loser determining later changes nothing.
            slow.fill(1).unwrap();
            sched::run_cycle().unwrap();
            assert_eq!(winner.peek(), Some(20));
        });
    }

    #[test]
    fn choose_tie_breaks_in_argument_order() {
        kernel(|| {
            let a = Deferred::determined("a");
            let b = Deferred::determined("b");
            let winner = choose(vec![choice(&a, |v| v), choice(&b, |v| v)]);

            while !winner.is_determined() {
                sched::run_cycle().unwrap();
            }
            assert_eq!(winner.peek(), Some("a"));
        });
    }

    #[test]
    fn any_unit_fires_on_the_first_determination() {
        kernel(|| {
            let pending: Ivar<u32> = Ivar::new();
            let done = any_unit(vec![pending.read(), Deferred::determined(1)]);
            while !done.is_determined() {
                sched::run_cycle().unwrap();
            }
        });
    }
}
