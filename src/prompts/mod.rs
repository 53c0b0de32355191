//! Prompt construction.
//!
//! The game is taught to the model through a fixed exchange of rules and
//! acknowledgements; every later turn is a single user message appended to
//! the stored history.

use crate::types::{ConversationHistory, Message, Protagonist, Theme};

/// Prefix marking a player-written choice.
pub const CUSTOM_CHOICE_PREFIX: &str = "自定义：";

/// Message asking the model to regenerate the current round.
pub const REROLL_MESSAGE: &str = "换一换";

const RULES: [(&str, &str); 7] = [
    (
        "我希望你扮演一个基于文本的冒险游戏，游戏主题：（稍后提供），游戏主角：（稍后提供）。如果你明白了就回复“收到”，之后我会给你介绍这个游戏的规则。",
        " 收到，我已经明白了。请告诉我这个游戏的规则。",
    ),
    (
        "游戏总共 8 回合，每一个回合你都需要生成故事内容和a、b、c三个选项。如果你明白了就回复“收到”，之后我会给你介绍每个回合生成内容的规则。",
        "收到，我已经明白了。请告诉我每个回合生成内容的规则。",
    ),
    (
        "每个回合都包含以下的字段，分别是：回合数，章节名，故事内容，故事选项。如果你明白了就回复“收到”，之后我会给你介绍每个字段的规则。",
        "收到，我已经明白了。请告诉我每个字段的规则。",
    ),
    (
        "1、回合数：记录当前回合数，整数类型，从0开始增加，到8终止；2、章节名：记录当前章节名字，枚举类型，分别是：故事的开端，情节推进，矛盾产生，关键决策，情节发展，高潮冲突，结局逼近，最终结局，章节名分别与回合数一一对应，回合1对应故事的开端，回合2对应情节推进，回合3对应矛盾产生，回合4对应关键决策，回合5对应情节发展，回合6对应高潮冲突，回合7对应结局逼近，回合8对应最终结局；3、故事内容：根据当前章节名的剧情提示，生成与上一个回合内容及选项相关的故事内容；4、故事选项：根据当前故事内容，生成3个相关的会影响故事发展的选项；如果你明白了就回复“收到”，之后我会给你介绍这个游戏的玩法。",
        "收到，我已经明白了。请告诉我这个游戏的玩法。",
    ),
    (
        "1、你需要根据我提供的游戏主题和游戏主角，先生成第一回合的所有内容给我；2、如果我回复游戏选项里的其中一个，你需要根据我回复的选项，生成下一个回合的所有内容给我；3、如果我回复“自定义”，你需要根据我回复的自定义内容，生成下一个回合的所有内容给我；4、如果我回复“换一换”，你需要重新生成当前回合的所有内容给我；如果你明白了就回复“收到”，之后我会给你介绍这个游戏的限制。",
        "收到，我已经明白了。请告诉我这个游戏的限制。",
    ),
    (
        "1、每个回合的故事内容必须控制在 80 字以内，游戏在第8回合结束；2、你给我生成的故事内容和故事选项需要是有趣搞怪一点的，前后逻辑有联系的，不要太拘泥于常规的内容，虚幻，古代，现实的题材都可以；3、每个回合的情节结构必须和章节名对应，8个回合8个情节循序渐进，缺一不可；如果你明白了就回复“收到”，之后我会给你介绍你回复的格式要求。",
        "收到，我已经明白了。请告诉我回复的格式要求。",
    ),
    (
        "回复的格式必须要json格式，key的对应关系如下：round对应回合数，chapter对应章节名，content对应故事内容，choice对应故事选项；参考示例：{\"round\":\"xxx\",\"chapter\":\"xxx\",\"content\":\"xxx\",\"choice\":[\"a.xxx\",\"b.xxx\",\"c.xxx\"]}；如果你明白了就回复“收到”，之后我就会给你发送游戏主题和游戏主角，然后游戏开始。",
        "收到，我已经明白了。请发送游戏主题和游戏主角，我将开始游戏。",
    ),
];

const ARTICLE_RULES: [(&str, &str); 2] = [
    (
        "中国小学各年级作文要求如下，请你牢记。\
一年级：主要是让学生学会运用简单的词语和句子表达自己的思想和感受，培养写作的兴趣。一般要求写句子、短文，内容可以是自己身边的事物、人物，也可以是想象中的事物。\
二年级：在一年级的基础上，二年级的作文要求学生能够运用更加丰富的词汇和句式进行表达，能写简单的记叙文和说明文。内容可以包括生活琐事、人物、景物等。\
三年级：三年级的学生需要在掌握基本语法和句式的基础上，学会进行合理的分段和连段成篇。能够写一些简单的记叙文、说明文和应用文，如书信、日记等。\
四年级：开始学习写作的篇章结构，如开头、结尾的写法，学会使用恰当的过渡语。在内容上，可以尝试写一些观察日记、读书笔记、游记等。\
五年级：要求学生能够独立构思和写作，能写一些复杂的记叙文、说明文和应用文。此外，还需要学会对文章进行修改和润色。\
六年级：六年级的作文要求学生能够熟练掌握各种文体的写作方法，如议论文、散文等。此外，还需要提高自己的审美和批判能力，学会对自己和他人的文章进行评价。",
        "收到，我已经记住了。请告诉我接下来需要我提供什么帮助。",
    ),
    (
        "接下来我会向你提供一篇小学作文，你需要给这篇作为进行评分，给出ABCD四种评分，并说明为什么。然后结合小学作文要求，给这篇作文提供评价及改进方向。你的改进方向需要具体一点",
        "收到，我已经明白了，请你把文章发给我。",
    ),
];

fn exchange(pairs: &[(&str, &str)]) -> ConversationHistory {
    pairs
        .iter()
        .flat_map(|(user, assistant)| [Message::user(*user), Message::assistant(*assistant)])
        .collect()
}

/// The rules exchange that precedes every game.
pub fn rules_preamble() -> ConversationHistory {
    exchange(&RULES)
}

/// The message that starts a game.
pub fn opening_message(theme: &Theme, protagonist: &Protagonist) -> Message {
    Message::user(format!(
        "游戏主题：{}，游戏主角：{}，{}",
        theme.description, protagonist.name, protagonist.description
    ))
}

/// Preamble plus opening message for a new game.
pub fn opening_prompt(theme: &Theme, protagonist: &Protagonist) -> ConversationHistory {
    rules_preamble().extended_with(opening_message(theme, protagonist))
}

/// A choice picked from the offered options, sent verbatim.
pub fn choice_message(choice: &str) -> Message {
    Message::user(choice)
}

/// A choice the player wrote themselves.
pub fn custom_choice_message(text: &str) -> Message {
    Message::user(format!("{}{}", CUSTOM_CHOICE_PREFIX, text))
}

/// Asks for the current round again.
pub fn reroll_message() -> Message {
    Message::user(REROLL_MESSAGE)
}

/// Grading preamble followed by the article; ends with a user message.
pub fn article_prompt(article: &str) -> ConversationHistory {
    exchange(&ARTICLE_RULES).extended_with(Message::user(article))
}
