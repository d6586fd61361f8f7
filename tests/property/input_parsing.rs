//! Property tests for the text process-list parser.

use proptest::prelude::*;

use mlfq_sim::input::parse_process_list;
use mlfq_sim::ProcessSpec;

proptest! {
    #[test]
    fn formatted_lists_parse_back(
        pairs in prop::collection::vec((any::<i64>(), any::<i64>()), 0..20),
        comment in "[a-z ]{0,12}",
    ) {
        let mut text = format!("# {comment}\n");
        for (burst, io) in &pairs {
            text.push_str(&format!("  {burst}\t{io}  # {comment}\n\n"));
        }
        let specs = parse_process_list(&text).unwrap();
        let expected: Vec<ProcessSpec> =
            pairs.iter().map(|&(b, io)| ProcessSpec::new(b, io)).collect();
        prop_assert_eq!(specs, expected);
    }

    #[test]
    fn arbitrary_text_never_panics(text in "\\PC{0,200}") {
        let _ = parse_process_list(&text);
    }
}
