//! Liveness analysis (§4.D): the last-use table `disappear[t]`.

use std::collections::HashSet;

use crate::linearize::Schedule;

/// `disappear[t]` is the set of hashes whose last occurrence as an
/// argument is at step `t`. Built by a single reverse pass: this is the
/// one place order matters, since "not yet seen" is evaluated walking
/// from the last step to the first.
pub fn disappear_table(schedule: &Schedule) -> Vec<HashSet<i32>> {
    let mut table: Vec<HashSet<i32>> = vec![HashSet::new(); schedule.len()];
    let mut seen: HashSet<i32> = HashSet::new();

    for t in (0..schedule.len()).rev() {
        for arg in schedule.nodes[t].args() {
            let h = arg.hash();
            if seen.insert(h) {
                table[t].insert(h);
            }
        }
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linearize::linearize;
    use exprjit_core::builder::var;

    #[test]
    fn last_use_is_recorded_once() {
        let x = var();
        let y = var();
        // x is used twice (by two different consumers); only the later
        // use should appear in the disappear table.
        let a = x.clone() + y.clone();
        let b = x.clone() * y.clone();
        let top = a + b;
        let schedule = linearize(&[x.clone(), y], &[top], false).unwrap();
        let table = disappear_table(&schedule);
        let occurrences: usize = table.iter().filter(|set| set.contains(&x.hash())).count();
        assert_eq!(occurrences, 1);
    }

    #[test]
    fn disappear_entry_is_at_the_consuming_step() {
        let x = var();
        let y = var();
        let sum = x.clone() + y.clone();
        let schedule = linearize(&[x.clone(), y.clone()], &[sum.clone()], false).unwrap();
        let table = disappear_table(&schedule);
        let sum_idx = schedule.index_of_hash(sum.hash()).unwrap();
        assert!(table[sum_idx].contains(&x.hash()));
        assert!(table[sum_idx].contains(&y.hash()));
    }
}
