//! Gender-inference prompt

use crate::types::NamePair;

/// Build the single user message sent for one author.
///
/// The reply is expected to contain one JSON object shaped like
/// `{"author": {"first_name", "last_name", "gender", "reasoning"}}`.
pub fn gender_prompt(pair: &NamePair) -> String {
    let first = pair.first_name();
    let last = pair.last_name();
    format!(
        r#"Given the name of the author, please identify the likely gender of the author.
Consider the following instructions:

- Provide the gender as either "male", "female", "other", or "not retrievable".
- Include a reasoning for the author based on the name provided.
- For composed names (e.g., "Jose María", "Emma Charles"), consider the combined meaning, as such names may indicate gender differently than their individual parts would suggest.

The first name of the author is: {first}.
The last name of the author is: {last}.

Please return the response in **strict JSON format only**, with no additional text.
Use the following structure:
{{
    "author": {{
        "first_name": "{first}",
        "last_name": "{last}",
        "gender": "male/female/other/not retrievable",
        "reasoning": "Explanation for the gender determination of the author."
    }}
}}
"#
    )
}
