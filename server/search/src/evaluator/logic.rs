use super::Evaluator;
use crate::prelude::*;

/// True when every child is. Children are tested cheapest first and the
/// first failure decides.
#[derive(Debug)]
pub struct AndEvaluator<'a> {
    filter: FilterResolved,
    children: Vec<Box<dyn Evaluator + 'a>>,
}

impl<'a> AndEvaluator<'a> {
    pub fn new(filter: FilterResolved, mut children: Vec<Box<dyn Evaluator + 'a>>) -> Self {
        children.sort_by_key(|e| e.filter().count());
        AndEvaluator { filter, children }
    }

    pub fn children(&self) -> &[Box<dyn Evaluator + 'a>] {
        &self.children
    }
}

impl Evaluator for AndEvaluator<'_> {
    fn evaluate(&self, candidate: &mut Candidate) -> Result<bool, OperationError> {
        for e in self.children.iter() {
            if !e.evaluate(candidate)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn evaluate_entry(&self, entry: &Entry) -> Result<bool, OperationError> {
        for e in self.children.iter() {
            if !e.evaluate_entry(entry)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn filter(&self) -> &FilterResolved {
        &self.filter
    }
}

#[derive(Debug)]
pub struct OrEvaluator<'a> {
    filter: FilterResolved,
    children: Vec<Box<dyn Evaluator + 'a>>,
}

impl<'a> OrEvaluator<'a> {
    pub fn new(filter: FilterResolved, children: Vec<Box<dyn Evaluator + 'a>>) -> Self {
        OrEvaluator { filter, children }
    }
}

impl Evaluator for OrEvaluator<'_> {
    fn evaluate(&self, candidate: &mut Candidate) -> Result<bool, OperationError> {
        for e in self.children.iter() {
            if e.evaluate(candidate)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn evaluate_entry(&self, entry: &Entry) -> Result<bool, OperationError> {
        for e in self.children.iter() {
            if e.evaluate_entry(entry)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn filter(&self) -> &FilterResolved {
        &self.filter
    }
}

#[derive(Debug)]
pub struct NotEvaluator<'a> {
    filter: FilterResolved,
    inner: Box<dyn Evaluator + 'a>,
}

impl<'a> NotEvaluator<'a> {
    pub fn new(filter: FilterResolved, inner: Box<dyn Evaluator + 'a>) -> Self {
        NotEvaluator { filter, inner }
    }
}

impl Evaluator for NotEvaluator<'_> {
    fn evaluate(&self, candidate: &mut Candidate) -> Result<bool, OperationError> {
        self.inner.evaluate(candidate).map(|b| !b)
    }

    fn evaluate_entry(&self, entry: &Entry) -> Result<bool, OperationError> {
        self.inner.evaluate_entry(entry).map(|b| !b)
    }

    fn filter(&self) -> &FilterResolved {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use crate::macros::*;
    use crate::prelude::*;

    fn check(store: &Store, f: Filter, id: EntryId) -> bool {
        let r = Optimiser::new(store).resolve(&f).expect("resolve");
        let e = EvaluatorBuilder::new(store).build(&r).expect("build");
        e.evaluate_id(id).expect("evaluate")
    }

    #[test]
    fn test_logic_evaluators() {
        run_search_test!(|store: &Store, ids: &Seeded| {
            let smiths = || f_and(vec![f_eq("sn", "smith"), f_pres("uid")]);
            assert!(check(store, smiths(), ids.alice));
            assert!(check(store, smiths(), ids.carol));
            assert!(!check(store, smiths(), ids.bob));

            let either = || f_or(vec![f_eq("uid", "bob"), f_eq("uid", "dave")]);
            assert!(check(store, either(), ids.bob));
            assert!(check(store, either(), ids.dave));
            assert!(!check(store, either(), ids.alice));

            assert!(check(store, f_not(f_eq("uid", "bob")), ids.alice));
            assert!(!check(store, f_not(f_eq("uid", "bob")), ids.bob));
            assert!(check(store, f_not(f_not(f_eq("uid", "bob"))), ids.bob));
        })
    }

    #[test]
    fn test_logic_empty_and_undefined() {
        run_search_test!(|store: &Store, ids: &Seeded| {
            // The empty and is true, the empty or false.
            assert!(check(store, f_and(vec![]), ids.ctx));
            assert!(!check(store, f_or(vec![]), ids.ctx));
            // A term on an unknown attribute matches nothing.
            assert!(!check(store, f_eq("nosuchattr", "x"), ids.alice));
            assert!(!check(store, f_and(vec![f_pres("uid"), f_eq("nosuchattr", "x")]), ids.alice));
            assert!(check(store, f_or(vec![f_pres("uid"), f_eq("nosuchattr", "x")]), ids.alice));
        })
    }
}
