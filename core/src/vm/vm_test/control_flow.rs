use super::*;
use crate::typ::MatchClass;

/// Routes `subject` through a `match` whose case `i` captures `case{i}` and
/// returns true; the else branch captures `else` and returns false.
fn route(class: MatchClass, subject: &str, labels: &[&str]) -> (bool, Vec<String>) {
    let mut h = Harness::new();
    let s = h.string(subject);
    let m = h.b.create_match(class, s);
    let blocks: Vec<BlockId> = (0..labels.len())
        .map(|i| h.b.create_block(&format!("case{i}")))
        .collect();
    let other = h.b.create_block("else");
    for (label, block) in labels.iter().zip(&blocks) {
        let label = match class {
            MatchClass::RegExp => h.b.get_regexp(FlowRegex::new(label).expect("valid regex")),
            _ => h.b.get_string(label),
        };
        h.b.add_match_case(m, label, *block);
    }
    h.b.set_match_else(m, other);
    for (i, block) in blocks.iter().enumerate() {
        h.b.set_insert_point(*block);
        h.capture_str(&format!("case{i}"));
        h.ret(true);
    }
    h.b.set_insert_point(other);
    h.capture_str("else");
    h.ret(false);
    h.run()
}

#[test]
fn test_match_same_takes_first_duplicate() {
    assert_eq!(
        route(MatchClass::Same, "b", &["a", "b", "b"]),
        (true, vec!["case1".to_owned()])
    );
    assert_eq!(
        route(MatchClass::Same, "c", &["a", "b"]),
        (false, vec!["else".to_owned()])
    );
}

#[test]
fn test_match_head_and_tail_check_cases_in_order() {
    assert_eq!(
        route(MatchClass::Head, "/api/users", &["/static", "/a", "/api"]),
        (true, vec!["case1".to_owned()])
    );
    assert_eq!(
        route(MatchClass::Tail, "index.html", &[".css", ".html"]),
        (true, vec!["case1".to_owned()])
    );
    assert_eq!(
        route(MatchClass::Tail, "index.php", &[".css", ".html"]),
        (false, vec!["else".to_owned()])
    );
}

#[test]
fn test_match_regexp() {
    assert_eq!(
        route(MatchClass::RegExp, "/users/42", &[r"^/posts/", r"^/users/\d+$"]),
        (true, vec!["case1".to_owned()])
    );
}

#[test]
fn test_match_regexp_exposes_groups_to_case_block() {
    let mut h = Harness::new();
    let path = h.string("/users/42/posts/7");
    let m = h.b.create_match_regexp(path);
    let hit = h.b.create_block("hit");
    let miss = h.b.create_block("miss");
    let re = h
        .b
        .get_regexp(FlowRegex::new(r"^/users/(\d+)/posts/(\d+)$").expect("valid regex"));
    h.b.add_match_case(m, re, hit);
    h.b.set_match_else(m, miss);

    h.b.set_insert_point(hit);
    for group in [2, 1] {
        let n = h.b.get_int(group);
        let text = h.b.create_regexp_group(n, "group");
        h.capture(text);
    }
    h.ret(true);
    h.b.set_insert_point(miss);
    h.ret(false);

    assert_eq!(h.run(), (true, vec!["7".to_owned(), "42".to_owned()]));
}

#[test]
fn test_condbr_takes_both_arms() {
    for flag in [true, false] {
        let mut h = Harness::new();
        let cond = h.boolean(flag);
        let yes = h.b.create_block("yes");
        let no = h.b.create_block("no");
        h.b.create_cond_br(cond, yes, no);
        h.b.set_insert_point(yes);
        h.capture_str("yes");
        h.ret(true);
        h.b.set_insert_point(no);
        h.capture_str("no");
        h.ret(false);

        let (handled, out) = h.run();
        assert_eq!(handled, flag);
        assert_eq!(out, [if flag { "yes" } else { "no" }]);
    }
}

#[test]
fn test_dynamic_return_value() {
    for flag in [true, false] {
        let mut h = Harness::new();
        let v = h.boolean(flag);
        h.b.create_ret(v);
        assert_eq!(h.run().0, flag);
    }
}

/// sum = 0; i = 0; while i < limit { sum += i; i += 1 }; capture(sum)
fn sum_below(limit: FlowNumber) -> Vec<String> {
    let mut h = Harness::new();
    let cond = h.b.create_block("cond");
    let body = h.b.create_block("body");
    let exit = h.b.create_block("exit");

    let i = h.b.create_alloca(FlowType::Number, "i");
    let sum = h.b.create_alloca(FlowType::Number, "sum");
    let zero = h.b.get_int(0);
    h.b.create_store(i, zero);
    h.b.create_store(sum, zero);
    let limit = h.int(limit);
    let bound = h.b.create_alloca(FlowType::Number, "limit");
    h.b.create_store(bound, limit);
    h.b.create_br(cond);

    h.b.set_insert_point(cond);
    let iv = h.b.create_load(i, "i");
    let lv = h.b.create_load(bound, "limit");
    let more = h.b.create_icmp_lt(iv, lv, "more");
    h.b.create_cond_br(more, body, exit);

    h.b.set_insert_point(body);
    let sv = h.b.create_load(sum, "sum");
    let iv = h.b.create_load(i, "i");
    let next_sum = h.b.create_add(sv, iv, "sum");
    h.b.create_store(sum, next_sum);
    let one = h.b.get_int(1);
    let next_i = h.b.create_add(iv, one, "i");
    h.b.create_store(i, next_i);
    h.b.create_br(cond);

    h.b.set_insert_point(exit);
    let total = h.b.create_load(sum, "total");
    h.capture(total);
    h.ret(true);

    h.run().1
}

#[test]
fn test_loop_with_variables() {
    assert_eq!(sum_below(5), ["10"]);
    assert_eq!(sum_below(0), ["0"]);
    assert_eq!(sum_below(100), ["4950"]);
}

#[test]
fn test_unreachable_code_is_not_emitted() {
    let mut h = Harness::new();
    let dead = h.b.create_block("dead");
    h.capture_str("live");
    h.ret(true);
    h.b.set_insert_point(dead);
    h.capture_str("dead");
    h.ret(false);

    let program = h.build();
    let strings = program.constants().strings();
    assert!(strings.iter().any(|s| s == "live"));
    assert!(!strings.iter().any(|s| s == "dead"));
    assert_eq!(run_captured(&program, "main"), (true, vec!["live".to_owned()]));
}
