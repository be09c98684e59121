//! Preambles and prompt builders for the three LLM roles.
//!
//! Notes and API data are Polish; every prompt asks for ASCII uppercase
//! output so answers can be used as lookup keys without further parsing.

use resolution::{EntityKind, ResolverInput};

/// Bump on any preamble or builder change; part of every cache key.
pub const PROMPT_VERSION: &str = "1.1.0";

pub const EXTRACTION_PREAMBLE: &str = "\
You read short investigative notes written in Polish and list the people and \
cities they mention. Respond with a single JSON object and nothing else.";

pub const NORMALIZER_PREAMBLE: &str = "\
You canonicalize Polish first names and city names. Convert the input to the \
nominative case, replace Polish letters (Ą Ć Ę Ł Ń Ó Ś Ź Ż) with their plain \
ASCII counterparts, and write the result in UPPERCASE. Allow for typos in the \
input. Respond with the normalized name only.";

pub const RESOLVER_PREAMBLE: &str = "\
You are an analyst locating a person from sighting records. You are given a \
note, who was seen where, and the cities already linked to the person. Answer \
with exactly one city name in UPPERCASE, with no punctuation or commentary. \
If nothing fits, answer UNKNOWN.";

/// Ask for every first name and every city in `note`.
pub fn extraction_prompt(note: &str) -> String {
    format!(
        "List, separately, every first name of a person and every city name that \
        appears in the note below.\n\
        Return JSON in exactly this shape: \
        {{\"names\":[\"NAME1\",\"NAME2\"],\"cities\":[\"CITY1\",\"CITY2\"]}}\n\n\
        Note:\n{note}"
    )
}

/// Ask for the cities `target` has been in before, according to `note`.
pub fn prior_locations_prompt(note: &str, target: &str) -> String {
    format!(
        "List every city in which, according to the note below, {target} has \
        been in the past.\n\
        Return JSON in exactly this shape: {{\"cities\":[\"CITY1\",\"CITY2\"]}}\n\n\
        Note:\n{note}"
    )
}

pub fn normalization_prompt(raw: &str, kind: EntityKind) -> String {
    match kind {
        EntityKind::Person => format!(
            "Normalize this person's name. Return ONLY the first name (the first \
            word, no whitespace), in uppercase.\n{raw}"
        ),
        EntityKind::Place => format!(
            "Normalize this city name. Return ONLY the city name in this form.\n{raw}"
        ),
    }
}

/// Full resolver prompt; the exclusion line appears only when something
/// has been rejected already.
pub fn resolver_prompt(input: &ResolverInput<'_>, target: &str) -> String {
    let mut sections = vec![
        format!("Note:\n{}", input.note),
        format!(
            "People and the cities they were seen in (format: {{person: [cities]}}):\n{}",
            input.associations.persons_json()
        ),
        format!(
            "Cities and the people seen there (format: {{city: [people]}}):\n{}",
            input.associations.places_json()
        ),
        format!(
            "Cities in which {target} was seen:\n{}",
            input.candidates_json()
        ),
    ];
    if !input.excluded.is_empty() {
        sections.push(format!(
            "Do not consider these cities as {target}'s current location: {}",
            input.excluded_list()
        ));
    }
    sections.push(format!(
        "Based on the data above, name the city where {target} is right now. \
        Return only the city name in uppercase."
    ));
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use resolution::AssociationMap;

    use super::*;

    fn input<'a>(
        associations: &'a AssociationMap,
        candidates: &'a [String],
        excluded: &'a BTreeSet<String>,
    ) -> ResolverInput<'a> {
        ResolverInput {
            note: "Barbara left Krakow.",
            associations,
            candidates,
            excluded,
        }
    }

    #[test]
    fn exclusion_line_only_when_needed() {
        let mut associations = AssociationMap::default();
        associations.insert("ADAM", "ELBLAG");
        let candidates = vec!["ELBLAG".to_string(), "WARSZAWA".to_string()];

        let none = BTreeSet::new();
        let prompt = resolver_prompt(&input(&associations, &candidates, &none), "BARBARA");
        assert!(!prompt.contains("Do not consider"));
        assert!(prompt.contains("\"ELBLAG\""));
        assert!(prompt.contains("ADAM"));

        let excluded: BTreeSet<String> = ["WARSZAWA".to_string()].into_iter().collect();
        let prompt = resolver_prompt(&input(&associations, &candidates, &excluded), "BARBARA");
        assert!(prompt.contains("current location: WARSZAWA"));
    }

    #[test]
    fn builders_embed_inputs() {
        assert!(extraction_prompt("Rafał w Lubawie").contains("Rafał w Lubawie"));
        assert!(prior_locations_prompt("n", "BARBARA").contains("BARBARA has"));
        assert!(normalization_prompt("Krakowie", EntityKind::Place).ends_with("Krakowie"));
        assert!(normalization_prompt("Rafałem", EntityKind::Person).contains("first name"));
    }
}
