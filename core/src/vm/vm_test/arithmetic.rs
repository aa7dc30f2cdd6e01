use super::*;

fn eval(build: impl FnOnce(&mut Harness)) -> Vec<String> {
    let mut h = Harness::new();
    build(&mut h);
    let (handled, out) = h.run();
    assert!(handled);
    out
}

#[test]
fn test_number_binary_ops() {
    use BinaryOp::*;
    let out = eval(|h| {
        let a = h.int(17);
        let b = h.int(5);
        for op in [IAdd, ISub, IMul, IDiv, IRem, IPow, IAnd, IOr, IXor, IShl, IShr] {
            let v = h.b.create_binary(op, a, b, "r");
            h.capture(v);
        }
    });
    assert_eq!(out, ["22", "12", "85", "3", "2", "1419857", "1", "21", "20", "544", "0"]);
}

#[test]
fn test_number_edge_cases() {
    let out = eval(|h| {
        let seven = h.int(7);
        let zero = h.int(0);
        let q = h.b.create_div(seven, zero, "q");
        h.capture(q);
        let r = h.b.create_rem(seven, zero, "r");
        h.capture(r);

        let minus_one = h.int(-1);
        let p = h.b.create_pow(seven, minus_one, "p");
        h.capture(p);

        let max = h.int(FlowNumber::MAX);
        let one = h.int(1);
        let wrapped = h.b.create_add(max, one, "wrapped");
        h.capture(wrapped);

        let sixty_five = h.int(65);
        let shifted = h.b.create_shl(one, sixty_five, "shifted");
        h.capture(shifted);

        let neg = h.b.create_neg(seven, "neg");
        h.capture(neg);
        let not = h.b.create_not(zero, "not");
        h.capture(not);
    });
    assert_eq!(out, ["0", "0", "0", FlowNumber::MIN.to_string().as_str(), "2", "-7", "-1"]);
}

#[test]
fn test_number_comparisons() {
    use BinaryOp::*;
    let out = eval(|h| {
        let a = h.int(3);
        let b = h.int(4);
        for op in [ICmpEQ, ICmpNE, ICmpLE, ICmpGE, ICmpLT, ICmpGT] {
            let v = h.b.create_binary(op, a, b, "cmp");
            h.capture(v);
        }
    });
    assert_eq!(out, ["false", "true", "true", "false", "true", "false"]);
}

#[test]
fn test_large_constants_round_trip() {
    let out = eval(|h| {
        let big = h.int(1 << 40);
        let one = h.b.get_int(1);
        let sum = h.b.create_add(big, one, "sum");
        h.capture(sum);
        let negative = h.int(-70_000);
        h.capture(negative);
    });
    assert_eq!(out, ["1099511627777", "-70000"]);
}

#[test]
fn test_boolean_ops() {
    use BinaryOp::*;
    let out = eval(|h| {
        let t = h.boolean(true);
        let f = h.boolean(false);
        for op in [BAnd, BOr, BXor] {
            let v = h.b.create_binary(op, t, f, "b");
            h.capture(v);
        }
        let not = h.b.create_bnot(f, "not");
        h.capture(not);
    });
    assert_eq!(out, ["false", "true", "true", "true"]);
}

#[test]
fn test_string_ops() {
    let out = eval(|h| {
        let hello = h.string("hello");
        let world = h.string(", world");
        let joined = h.b.create_sadd(hello, world, "joined");
        h.capture(joined);

        let len = h.b.create_slen(hello, "len");
        h.capture(len);
        let empty = h.string("");
        let is_empty = h.b.create_sis_empty(empty, "empty");
        h.capture(is_empty);

        let one = h.int(1);
        let three = h.int(3);
        let sub = h.b.create_substr(hello, one, three, "sub");
        h.capture(sub);
        let minus = h.int(-2);
        let clamped = h.b.create_substr(hello, minus, three, "clamped");
        h.capture(clamped);
        let hundred = h.int(100);
        let tail = h.b.create_substr(hello, three, hundred, "tail");
        h.capture(tail);
    });
    assert_eq!(out, ["hello, world", "5", "true", "ell", "hel", "lo"]);
}

#[test]
fn test_string_comparisons() {
    use BinaryOp::*;
    let out = eval(|h| {
        let a = h.string("abc");
        let b = h.string("abd");
        for op in [SCmpEQ, SCmpNE, SCmpLE, SCmpGE, SCmpLT, SCmpGT] {
            let v = h.b.create_binary(op, a, b, "cmp");
            h.capture(v);
        }
        let path = h.string("/api/users");
        let api = h.string("/api");
        let users = h.string("users");
        let begins = h.b.create_scmp_beg(path, api, "begins");
        h.capture(begins);
        let ends = h.b.create_scmp_end(path, users, "ends");
        h.capture(ends);
        let inside = h.b.create_sin(path, users, "inside");
        h.capture(inside);
        let reversed = h.b.create_sin(users, path, "reversed");
        h.capture(reversed);
    });
    assert_eq!(out, ["false", "true", "true", "false", "true", "false", "true", "true", "true", "false"]);
}

#[test]
fn test_unicode_lengths_count_characters() {
    let out = eval(|h| {
        let s = h.string("héllo");
        let len = h.b.create_slen(s, "len");
        h.capture(len);
        let one = h.int(1);
        let sub = h.b.create_substr(s, one, one, "sub");
        h.capture(sub);
    });
    assert_eq!(out, ["5", "é"]);
}

#[test]
fn test_conversions() {
    let out = eval(|h| {
        let n = h.int(-42);
        let s = h.b.create_convert(FlowType::String, n, "s");
        h.capture(s);

        let padded = h.string("  17 ");
        let parsed = h.b.create_convert(FlowType::Number, padded, "parsed");
        h.capture(parsed);
        let garbage = h.string("12abc");
        let zero = h.b.create_convert(FlowType::Number, garbage, "zero");
        h.capture(zero);

        let ip = h.ip("192.168.0.1");
        let text = h.b.create_convert(FlowType::String, ip, "ip");
        h.capture(text);

        let seven = h.int(7);
        let truthy = h.b.create_convert(FlowType::Boolean, seven, "truthy");
        h.capture(truthy);
        let nothing = h.int(0);
        let falsy = h.b.create_convert(FlowType::Boolean, nothing, "falsy");
        h.capture(falsy);
    });
    assert_eq!(out, ["-42", "17", "0", "192.168.0.1", "true", "false"]);
}

#[test]
fn test_ip_ops() {
    let out = eval(|h| {
        let a = h.ip("10.0.0.1");
        let b = h.ip("10.0.0.2");
        let eq = h.b.create_pcmp_eq(a, b, "eq");
        h.capture(eq);
        let ne = h.b.create_pcmp_ne(a, b, "ne");
        h.capture(ne);

        let net = h.cidr("10.0.0.0/30");
        let inside = h.b.create_pin_cidr(b, net, "inside");
        h.capture(inside);
        let v6 = h.ip("::1");
        let outside = h.b.create_pin_cidr(v6, net, "outside");
        h.capture(outside);
        let net_text = h.b.create_convert(FlowType::String, net, "net");
        h.capture(net_text);
    });
    assert_eq!(out, ["false", "true", "true", "false", "10.0.0.0/30"]);
}

#[test]
fn test_regex_match_sets_capture_groups() {
    let out = eval(|h| {
        let subject = h.string("user=alice id=42");
        let re = h
            .b
            .get_regexp(FlowRegex::new(r"user=(\w+) id=(\d+)").expect("valid regex"));
        let matched = h.b.create_scmp_re(subject, re, "matched");
        h.capture(matched);
        for group in [0, 1, 2, 3] {
            let n = h.b.get_int(group);
            let text = h.b.create_regexp_group(n, "group");
            h.capture(text);
        }
        let miss = h.string("nothing here");
        let failed = h.b.create_scmp_re(miss, re, "failed");
        h.capture(failed);
        let one = h.b.get_int(1);
        let kept = h.b.create_regexp_group(one, "kept");
        h.capture(kept);
    });
    assert_eq!(
        out,
        ["true", "user=alice id=42", "alice", "42", "", "false", "alice"]
    );
}
