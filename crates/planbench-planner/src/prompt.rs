//! Prompt templates and assembly.
//!
//! System templates carry three placeholders filled per call: `{max_id}`
//! (highest valid action id), `{actions}` (the enumerated action list) and
//! `{examples}` (the few-shot block).

use planbench_types::{Action, ActionSpace, EnvKind};

pub const ALFRED_SYSTEM_PROMPT: &str = "## You are a robot operating in a home. Given a task, you must accomplish the task using a defined set of actions to achieve the desired outcome.

## Action Descriptions and Validity Rules
- Find: Parameterized by the name of the receptacle to navigate to. So long as the object is present in the scene, this skill is always valid.
- Pick up: Parameterized by the name of the object to pick. Only valid if the robot is close to the object, not holding another object, and the object is not inside a closed receptacle.
- Put down: Parameterized by the name of the object to put down to a nearby receptacle. Only valid if the robot is holding an object.
- Drop: Parameterized by the name of the object to put down. It is different from the Put down action, as this does not guarantee the held object will be put into a specified receptacle.
- Open: Parameterized by the name of the receptacle to open. Only valid if the receptacle is closed and the robot is close to the receptacle.
- Close: Parameterized by the name of the receptacle to close. Only valid if the receptacle is open and the robot is close to the receptacle.
- Turn on: Parameterized by the name of the object to turn on. Only valid if the object is turned off and the robot is close to the object.
- Turn off: Parameterized by the name of the object to turn off. Only valid if the object is turned on and the robot is close to the object.
- Slice: Parameterized by the name of the object to slice. Only valid if the object is sliceable and the robot is close to the object.

## The available action id (0 ~ {max_id}) and action names are: {actions}.

{examples}

## Guidelines
1. **Output Plan**: Avoid generating empty plan. Each plan should include no more than 20 actions.
2. **Visibility**: Always locate a visible object by the 'find' action before interacting with it.
3. **Action Guidelines**: Make sure match the action name and its corresponding action id in the output. Avoid performing actions that do not meet the defined validity criteria.
4. **Prevent Repeating Action Sequences**: Do not repeatedly execute the same action or sequence of actions. Try to modify the action sequence because previous actions do not lead to success.
5. **Multiple Instances**: There may be multiple instances of the same object, distinguished by an index following their names, e.g., Cabinet_2, Cabinet_3. You can explore these instances if you do not find the desired object in the current receptacle.
6. **Reflection on History and Feedback**: Use interaction history and feedback from the environment to refine and improve your current plan. If the last action is invalid, reflect on the reason, such as not adhering to action rules or missing preliminary actions, and adjust your plan accordingly.";

pub const MANIPULATION_SYSTEM_PROMPT: &str = "## You are a Franka Panda robot with a parallel gripper. You can perform various tasks and output a sequence of gripper actions to accomplish a given task with images of your status. The input space, output action space and color space are defined as follows:

** Input Space **
- Each input object is represented as a 3D discrete position in the following format: [X, Y, Z].
- There is a red XYZ coordinate frame located in the top-left corner of the table. The X-Y plane is the table surface.
- The allowed range of X, Y, Z is [0, 100].
- Objects are ordered by Y in ascending order.

** Output Action Space **
- Each output action is represented as a 7D discrete gripper action in the following format: [X, Y, Z, Roll, Pitch, Yaw, Gripper state].
- X, Y, Z are the 3D discrete position of the gripper in the environment. It follows the same coordinate system as the input object coordinates.
- The allowed range of X, Y, Z is [0, 100].
- Roll, Pitch, Yaw are the 3D discrete orientation of the gripper in the environment, represented as discrete Euler Angles.
- The allowed range of Roll, Pitch, Yaw is [0, 120] and each unit represents 3 degrees.
- Gripper state is 0 for close and 1 for open.

** Color space **
- Each object can be described using one of the colors below:
  [\"red\", \"maroon\", \"lime\", \"green\", \"blue\", \"navy\", \"yellow\", \"cyan\", \"magenta\", \"silver\", \"gray\", \"olive\", \"purple\", \"teal\", \"azure\", \"violet\", \"rose\", \"black\", \"white\"],

{actions}

{examples}

Below are some general guidelines you need to follow:
- Please first identify the objects in the image and their 3D positions; then output the action sequence to complete the task.
- If the gripper is grasping an object, keep the gripper closed while moving.
- Always verify the gripper state before attempting to grasp.";

/// JSON layout appended for models that cannot take a response schema.
pub const JSON_TEMPLATE: &str = r#"

The output json format should be {"visual_state_description": str, "reasoning_and_reflection": str, "language_plan": str, "executable_plan": List[{"action_id": int, "action_name": str}]}
The fields in above JSON follows the purpose below:
1. visual_state_description is for description of current state from the visual image,
2. reasoning_and_reflection is for summarizing the history of interactions and any available environmental feedback. Additionally, provide reasoning as to why the last action or plan failed and did not finish the task,
3. language_plan is for describing a list of actions to achieve the user instruction. Each action is started by the step number and the action name,
4. executable_plan is a list of actions needed to achieve the user instruction, with each action having an action ID and a name.
!!! When generating content for JSON strings, avoid using any contractions or abbreviated forms (like 's, 're, 've, 'll, 'd, n't) that use apostrophes. Instead, write out full forms (is, are, have, will, would, not) to prevent parsing errors in JSON. Please do not output any other thing more than the above-mentioned JSON, do not include ```json and ```!!!."#;

/// Language-only variant of [`JSON_TEMPLATE`] (no visual description).
pub const JSON_TEMPLATE_LANG: &str = r#"

The output json format should be {"reasoning_and_reflection": str, "language_plan": str, "executable_plan": List[{"action_id": int, "action_name": str}]}
The fields in above JSON follows the purpose below:
1. reasoning_and_reflection is for summarizing the history of interactions and any available environmental feedback. Additionally, provide reasoning as to why the last action or plan failed and did not finish the task,
2. language_plan is for describing a list of actions to achieve the user instruction. Each action is started by the step number and the action name,
3. executable_plan is a list of actions needed to achieve the user instruction, with each action having an action ID and a name.
!!! When generating content for JSON strings, avoid using any contractions or abbreviated forms (like 's, 're, 've, 'll, 'd, n't) that use apostrophes. Instead, write out full forms (is, are, have, will, would, not) to prevent parsing errors in JSON. Please do not output any other thing more than the above-mentioned JSON, do not include ```json and ```!!!."#;

/// JSON layout for `space`, for models that take no response schema.
pub fn output_template(space: &ActionSpace, language_only: bool) -> String {
    let template = if language_only { JSON_TEMPLATE_LANG } else { JSON_TEMPLATE };
    match space {
        ActionSpace::Discrete { .. } => template.to_string(),
        ActionSpace::Vector { .. } => template
            .replace(r#"{"action_id": int, "action_name": str}"#, r#"{"action": List[int]}"#)
            .replace("with each action having an action ID and a name", "with each action being a list of integers"),
    }
}

/// Default system template for an environment.
pub fn system_prompt_for(kind: EnvKind) -> &'static str {
    match kind {
        EnvKind::Alfred => ALFRED_SYSTEM_PROMPT,
        EnvKind::Manipulation => MANIPULATION_SYSTEM_PROMPT,
    }
}

/// Enumerate the actions of `space` for the system prompt.
///
/// Discrete spaces yield `\naction id i: name` entries joined by `, `.
pub fn available_actions(space: &ActionSpace) -> String {
    match space {
        ActionSpace::Discrete { actions } => actions
            .iter()
            .enumerate()
            .map(|(i, name)| format!("\naction id {i}: {name}"))
            .collect::<Vec<_>>()
            .join(", "),
        ActionSpace::Vector { dims } => {
            format!("Every executable_plan step carries an \"action\" list of {dims} integers.")
        }
    }
}

/// `## Task Execution Example i` blocks for the first `n_shot` examples.
///
/// Replanning prompts put two spaces before the index.
pub fn examples_block(examples: &[String], n_shot: usize, replanning: bool) -> String {
    let gap = if replanning { "  " } else { " " };
    examples
        .iter()
        .take(n_shot)
        .enumerate()
        .map(|(i, x)| format!("## Task Execution Example{gap}{i}: \n {x}"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn fill_system_prompt(template: &str, space: &ActionSpace, actions: &str, examples: &str) -> String {
    template
        .replace("{max_id}", &space.max_action_id().to_string())
        .replace("{actions}", actions)
        .replace("{examples}", examples)
}

/// Output instruction appended after the human instruction on the first step.
pub fn first_step_instruction(max_id: usize, language_only: bool) -> String {
    if language_only {
        format!(
            " You are supposed to output in json. You need to output your reasoning steps and plan. At the end, output the action id (0 ~ {max_id}) from the available actions to excute."
        )
    } else {
        format!(
            " You are supposed to output in json. You need to describe current visual state from the image, output your reasoning steps and plan. At the end, output the action id (0 ~ {max_id}) from the available actions to excute."
        )
    }
}

/// `The action history:` block followed by one line per executed action.
pub fn action_history(space: &ActionSpace, history: &[(Action, String)], use_feedback: bool) -> String {
    let mut out = String::from("\n\n The action history:");
    for (i, (action, feedback)) in history.iter().enumerate() {
        let name = space.describe(action);
        if use_feedback {
            out.push_str(&format!("\nStep {i}, action id {action}, {name}, env feedback: {feedback}"));
        } else {
            out.push_str(&format!("\nStep {i}, action id {action}, {name}"));
        }
    }
    out
}

/// Replanning instruction that closes every prompt after the first step.
pub fn replan_instruction(instruction: &str, max_id: usize, language_only: bool, use_feedback: bool) -> String {
    let feedback = if use_feedback { "and environment feedback " } else { "" };
    if language_only {
        format!(
            "\n\n Considering the above interaction history, to achieve the human instruction: '{instruction}', you are supposed to output in json. You need to summarize interaction history {feedback}and reason why the last action or plan failed and did not finish the task, output your new plan to achieve the goal from current state. At the end, output the executable plan with action ids(0 ~ {max_id}) from the available actions."
        )
    } else {
        format!(
            "\n\n Considering the above interaction history and the current image state, to achieve the human instruction: '{instruction}', you are supposed to output in json. You need to describe current visual state from the image, summarize interaction history {feedback}and reason why the last action or plan failed and did not finish the task, output your new plan to achieve the goal from current state. At the end, output the excutable plan with action ids(0 ~ {max_id}) from the available actions."
        )
    }
}

/// Repair common formatting slips in model output so it parses as JSON.
///
/// Strips Markdown fences, keeps the outermost `{ ... }` span and removes
/// trailing commas before a closing bracket.
pub fn fix_json(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    let text = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text.trim(),
    };

    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars: Vec<char> = text.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}
