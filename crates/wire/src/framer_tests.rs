// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn empty_buffer_yields_nothing() {
    let mut framer = LineFramer::new();
    assert_eq!(framer.try_read_line(), None);
    assert!(framer.is_empty());
}

#[test]
fn partial_line_is_held_until_newline_arrives() {
    let mut framer = LineFramer::new();
    framer.append(b"{\"cmd\":");
    assert_eq!(framer.try_read_line(), None);
    assert_eq!(framer.buffer_len(), 7);

    framer.append(b"\"x\"}\n");
    assert_eq!(framer.try_read_line(), Some(b"{\"cmd\":\"x\"}".to_vec()));
    assert!(framer.is_empty());
}

#[test]
fn multiple_lines_in_one_append() {
    let mut framer = LineFramer::new();
    framer.append(b"one\ntwo\nthr");
    assert_eq!(framer.try_read_line(), Some(b"one".to_vec()));
    assert_eq!(framer.try_read_line(), Some(b"two".to_vec()));
    assert_eq!(framer.try_read_line(), None);
    framer.append(b"ee\n");
    assert_eq!(framer.try_read_line(), Some(b"three".to_vec()));
}

#[test]
fn empty_lines_are_yielded() {
    let mut framer = LineFramer::new();
    framer.append(b"\n\na\n");
    assert_eq!(framer.try_read_line(), Some(Vec::new()));
    assert_eq!(framer.try_read_line(), Some(Vec::new()));
    assert_eq!(framer.try_read_line(), Some(b"a".to_vec()));
}

#[test]
fn clear_discards_residue() {
    let mut framer = LineFramer::new();
    framer.append(b"partial");
    framer.clear();
    assert!(framer.is_empty());
    framer.append(b"fresh\n");
    assert_eq!(framer.try_read_line(), Some(b"fresh".to_vec()));
}

#[test]
fn no_bytes_are_lost_across_chunked_appends() {
    let input = b"alpha\nbeta\ngamma\ndelta";
    let mut framer = LineFramer::new();
    let mut collected: Vec<u8> = Vec::new();

    // Feed one byte at a time to exercise every split point.
    for &b in input.iter() {
        framer.append(&[b]);
        while let Some(line) = framer.try_read_line() {
            collected.extend_from_slice(&line);
            collected.push(b'\n');
        }
    }

    // Reassembled lines plus the residual buffer equal the input.
    let mut reassembled = collected.clone();
    reassembled.extend_from_slice(&framer_residue(&mut framer));
    assert_eq!(reassembled, input);
}

fn framer_residue(framer: &mut LineFramer) -> Vec<u8> {
    // Drain the residue by terminating it.
    framer.append(b"\n");
    framer.try_read_line().unwrap_or_default()
}
